// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Page-table collaborator and demand pager used by page payloads
//! OWNERS: @kernel-mm-team
//! PUBLIC API: PageTable, PageFlags, MapError, fault::{VmArea, FrameAllocator, handle_page_fault}
//! DEPENDS_ON: types::{VirtAddr, PhysAddr}, config::FramePool
//! INVARIANTS: 4 KiB pages; user mappings only inside [USER_BASE, USER_END); W^X; multi-page
//!             links are all-or-nothing

use bitflags::bitflags;

use crate::types::VirtAddr;

pub mod fault;
pub mod page_table;

pub use fault::{handle_page_fault, FaultError, FrameAllocator, VmArea, VmAreaKind};
pub use page_table::{Mapping, PageTable};

/// Size of a page in bytes.
pub const PAGE_SIZE: usize = synapse_abi::PAGE_SIZE;
/// Lowest user virtual address; page 0 stays unmapped.
pub const USER_BASE: usize = PAGE_SIZE;
/// End of the user half of an Sv39 address space.
pub const USER_END: usize = 1 << 38;

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    /// Flags stored in a page-table entry.
    pub struct PageFlags: usize {
        const VALID = 1 << 0;
        const READ = 1 << 1;
        const WRITE = 1 << 2;
        const EXECUTE = 1 << 3;
        const USER = 1 << 4;
    }
}

/// Flags used for pages received through a page payload.
pub const PAYLOAD_FLAGS: PageFlags = PageFlags::VALID
    .union(PageFlags::READ)
    .union(PageFlags::WRITE)
    .union(PageFlags::USER);

/// Error returned by mapping operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// Virtual or physical address is not page aligned.
    Unaligned,
    /// Mapping leaves the user address range.
    OutOfRange,
    /// Mapping violates W^X (or a failpoint denied it).
    PermissionDenied,
    /// Mapping overlaps an existing entry.
    Overlap,
    /// Flags do not describe a valid leaf entry.
    InvalidFlags,
}

/// Number of pages covering `len` bytes.
#[inline]
pub const fn pages_for(len: usize) -> usize {
    len.div_ceil(PAGE_SIZE)
}

/// Returns true if `va` can receive a page payload.
#[inline]
pub const fn is_valid_page_base(va: VirtAddr) -> bool {
    va.is_page_aligned() && va.is_user()
}
