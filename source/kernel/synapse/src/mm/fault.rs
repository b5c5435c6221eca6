// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Demand pager backing unmapped user pages
//! OWNERS: @kernel-mm-team
//! PUBLIC API: VmArea, VmAreaKind, FrameAllocator, FaultError, handle_page_fault
//! DEPENDS_ON: mm::PageTable, config::FramePool
//! INVARIANTS: A fault either returns a mapped physical address or an error (the caller then
//!             terminates the faulting thread); areas never overlap within one process

use alloc::vec::Vec;

use super::{MapError, PageFlags, PageTable, PAGE_SIZE};
use crate::config::FramePool;
use crate::types::{PhysAddr, VirtAddr};

/// How pages of an area are backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmAreaKind {
    /// Fresh frames from the frame allocator.
    Anonymous,
    /// Identity map (virtual == physical), used for device windows.
    Straight,
    /// Linear map onto a fixed physical range starting at `phys_base`.
    Fixed { phys_base: PhysAddr },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmArea {
    pub base: VirtAddr,
    pub len: usize,
    pub flags: PageFlags,
    pub kind: VmAreaKind,
}

impl VmArea {
    pub fn new(base: VirtAddr, len: usize, flags: PageFlags, kind: VmAreaKind) -> Self {
        Self { base, len, flags, kind }
    }

    pub fn contains(&self, va: VirtAddr) -> bool {
        va.raw() >= self.base.raw() && va.raw() - self.base.raw() < self.len
    }

    pub fn overlaps(&self, other: &VmArea) -> bool {
        let end = self.base.raw().saturating_add(self.len);
        let other_end = other.base.raw().saturating_add(other.len);
        self.base.raw() < other_end && other.base.raw() < end
    }

    /// Checks alignment and range of the area itself.
    pub fn validate(&self) -> Result<(), MapError> {
        if !self.base.is_page_aligned() || self.len == 0 || self.len % PAGE_SIZE != 0 {
            return Err(MapError::Unaligned);
        }
        let last = self.base.checked_add(self.len - 1).ok_or(MapError::OutOfRange)?;
        if !self.base.is_user() || !last.is_user() {
            return Err(MapError::OutOfRange);
        }
        Ok(())
    }
}

/// Bump allocator over the configured frame pool with a recycle list.
#[derive(Debug)]
pub struct FrameAllocator {
    next: PhysAddr,
    end: PhysAddr,
    recycled: Vec<PhysAddr>,
}

impl FrameAllocator {
    pub fn new(pool: FramePool) -> Self {
        let end = pool
            .frames
            .checked_mul(PAGE_SIZE)
            .and_then(|bytes| pool.base.checked_add(bytes))
            .unwrap_or(pool.base);
        Self { next: pool.base, end, recycled: Vec::new() }
    }

    pub fn alloc(&mut self) -> Option<PhysAddr> {
        if let Some(frame) = self.recycled.pop() {
            return Some(frame);
        }
        if self.next >= self.end {
            return None;
        }
        let frame = self.next;
        self.next = frame.checked_add(PAGE_SIZE)?;
        Some(frame)
    }

    pub fn free(&mut self, frame: PhysAddr) {
        self.recycled.push(frame);
    }

    pub fn available(&self) -> usize {
        (self.end.raw() - self.next.raw()) / PAGE_SIZE + self.recycled.len()
    }
}

/// Why a fault could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// No area covers the address.
    NoArea,
    /// Frame pool exhausted.
    OutOfMemory,
    Map(MapError),
}

impl From<MapError> for FaultError {
    fn from(value: MapError) -> Self {
        Self::Map(value)
    }
}

/// Fills the page containing `va` and returns the physical address backing `va`.
pub fn handle_page_fault(
    areas: &[VmArea],
    table: &mut PageTable,
    frames: &mut FrameAllocator,
    va: VirtAddr,
) -> Result<PhysAddr, FaultError> {
    if let Some(pa) = table.resolve_physical(va) {
        return Ok(pa);
    }
    let area = areas.iter().find(|area| area.contains(va)).ok_or(FaultError::NoArea)?;
    let page = va.page_floor();
    let frame = match area.kind {
        VmAreaKind::Anonymous => frames.alloc().ok_or(FaultError::OutOfMemory)?,
        VmAreaKind::Straight => PhysAddr::new(page.raw()),
        VmAreaKind::Fixed { phys_base } => phys_base
            .checked_add(page.raw() - area.base.raw())
            .ok_or(FaultError::Map(MapError::OutOfRange))?,
    };
    if let Err(err) = table.map(page, frame, area.flags | PageFlags::VALID) {
        if area.kind == VmAreaKind::Anonymous {
            frames.free(frame);
        }
        return Err(err.into());
    }
    log_trace!(target: "mm", "fault: {} -> {}", page, frame);
    frame.checked_add(va.page_offset()).ok_or(FaultError::Map(MapError::OutOfRange))
}
