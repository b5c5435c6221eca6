// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Newtypes for kernel identifiers and addresses
//! OWNERS: @kernel-team
//! PUBLIC API: Pid, Tid, Cid, ChannelId, VirtAddr, PhysAddr
//! DEPENDS_ON: mm::{PAGE_SIZE, USER_BASE, USER_END}
//! INVARIANTS: Cid 0 is never a valid handle; ChannelId generations make stale ids unreadable
//!
//! Keeping handles, arena ids and addresses in distinct types prevents a per-process handle
//! from being used as a global channel index (and vice versa).

use core::fmt;

use crate::mm::{PAGE_SIZE, USER_BASE, USER_END};

/// Process identifier.
///
/// **Invariant**: PID 0 is the kernel process.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Pid(u32);

impl Pid {
    /// Kernel process.
    pub const KERNEL: Self = Self(0);

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn as_index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thread identifier: slot index plus the generation of the slot.
///
/// Exited slots are recycled under a new generation, so a stale id never names a later thread.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tid {
    index: u32,
    generation: u32,
}

impl Tid {
    #[inline]
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    #[inline]
    pub const fn as_index(self) -> usize {
        self.index as usize
    }

    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.generation == 0 {
            write!(f, "{}", self.index)
        } else {
            write!(f, "{}.{}", self.index, self.generation)
        }
    }
}

/// Channel handle, local to the owning process.
///
/// **Invariant**: handles are positive; 0 means "no sender" in notification messages.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Cid(u32);

impl Cid {
    /// Largest representable handle (the ABI carries handles as `i32`).
    pub const MAX: u32 = i32::MAX as u32;

    /// Creates a handle from a positive raw value.
    #[inline]
    pub const fn new(raw: u32) -> Option<Self> {
        if raw == 0 || raw > Self::MAX {
            None
        } else {
            Some(Self(raw))
        }
    }

    /// Decodes a handle passed in a syscall register.
    #[inline]
    pub fn decode(reg: usize) -> Option<Self> {
        u32::try_from(reg).ok().and_then(Self::new)
    }

    /// Decodes a handle stored in a message field.
    #[inline]
    pub fn from_abi(value: i32) -> Option<Self> {
        u32::try_from(value).ok().and_then(Self::new)
    }

    #[inline]
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    /// Handle as stored in message fields.
    #[inline]
    pub const fn to_abi(self) -> i32 {
        self.0 as i32
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Index of a channel in the global arena plus the generation of the slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChannelId {
    index: u32,
    generation: u32,
}

impl ChannelId {
    #[inline]
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.index as usize
    }

    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch#{}.{}", self.index, self.generation)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtAddr(usize);

impl VirtAddr {
    #[inline]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    #[inline]
    pub const fn raw(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn is_page_aligned(self) -> bool {
        self.0 % PAGE_SIZE == 0
    }

    #[inline]
    pub const fn page_offset(self) -> usize {
        self.0 % PAGE_SIZE
    }

    #[inline]
    pub const fn page_floor(self) -> Self {
        Self(self.0 - self.0 % PAGE_SIZE)
    }

    /// Returns true if the address lies in the user half of the address space.
    #[inline]
    pub const fn is_user(self) -> bool {
        self.0 >= USER_BASE && self.0 < USER_END
    }

    #[inline]
    pub fn checked_add(self, bytes: usize) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }

    /// Address of the `index`-th page after this one.
    #[inline]
    pub fn page(self, index: usize) -> Option<Self> {
        index.checked_mul(PAGE_SIZE).and_then(|off| self.checked_add(off))
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhysAddr(usize);

impl PhysAddr {
    #[inline]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    #[inline]
    pub const fn raw(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn is_page_aligned(self) -> bool {
        self.0 % PAGE_SIZE == 0
    }

    #[inline]
    pub fn checked_add(self, bytes: usize) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }

    #[inline]
    pub fn page(self, index: usize) -> Option<Self> {
        index.checked_mul(PAGE_SIZE).and_then(|off| self.checked_add(off))
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
