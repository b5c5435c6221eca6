// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-process page table keyed by virtual page number.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use super::{MapError, PageFlags, PAGE_SIZE};
use crate::types::{PhysAddr, VirtAddr};

/// A single leaf mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mapping {
    pub phys: PhysAddr,
    pub flags: PageFlags,
}

const LEAF_PERMS: PageFlags = PageFlags::READ.union(PageFlags::WRITE).union(PageFlags::EXECUTE);

#[derive(Debug, Default)]
pub struct PageTable {
    entries: BTreeMap<usize, Mapping>,
    #[cfg(feature = "failpoints")]
    deny_next_map: bool,
}

impl PageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a 4 KiB mapping from `va` to `pa`.
    pub fn map(&mut self, va: VirtAddr, pa: PhysAddr, flags: PageFlags) -> Result<(), MapError> {
        if !va.is_page_aligned() || !pa.is_page_aligned() {
            return Err(MapError::Unaligned);
        }
        if !va.is_user() {
            return Err(MapError::OutOfRange);
        }
        if !flags.contains(PageFlags::VALID) || flags.intersection(LEAF_PERMS).is_empty() {
            return Err(MapError::InvalidFlags);
        }
        if flags.contains(PageFlags::WRITE) && flags.contains(PageFlags::EXECUTE) {
            return Err(MapError::PermissionDenied);
        }
        let vpn = va.raw() / PAGE_SIZE;
        if self.entries.contains_key(&vpn) {
            return Err(MapError::Overlap);
        }
        #[cfg(feature = "failpoints")]
        if core::mem::take(&mut self.deny_next_map) {
            return Err(MapError::PermissionDenied);
        }
        self.entries.insert(vpn, Mapping { phys: pa, flags });
        Ok(())
    }

    /// Returns the mapping of the page containing `va`.
    pub fn lookup(&self, va: VirtAddr) -> Option<Mapping> {
        self.entries.get(&(va.raw() / PAGE_SIZE)).copied()
    }

    /// Translates `va` to a physical address, keeping the page offset.
    pub fn resolve_physical(&self, va: VirtAddr) -> Option<PhysAddr> {
        self.lookup(va).and_then(|m| m.phys.checked_add(va.page_offset()))
    }

    /// Maps `count` physically contiguous pages starting at `pa`.
    pub fn link_pages(
        &mut self,
        va: VirtAddr,
        pa: PhysAddr,
        count: usize,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        let frames = (0..count)
            .map(|index| pa.page(index).ok_or(MapError::OutOfRange))
            .collect::<Result<Vec<_>, _>>()?;
        self.link_frames(va, &frames, flags)
    }

    /// Maps one page per entry of `frames` starting at `va`. Nothing stays mapped on failure.
    pub fn link_frames(
        &mut self,
        va: VirtAddr,
        frames: &[PhysAddr],
        flags: PageFlags,
    ) -> Result<(), MapError> {
        for (index, frame) in frames.iter().enumerate() {
            let result = va
                .page(index)
                .ok_or(MapError::OutOfRange)
                .and_then(|page| self.map(page, *frame, flags));
            if let Err(err) = result {
                self.unlink_pages(va, index);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Removes up to `count` mappings starting at `va`; returns how many were present.
    pub fn unlink_pages(&mut self, va: VirtAddr, count: usize) -> usize {
        let first = va.raw() / PAGE_SIZE;
        (first..first.saturating_add(count))
            .filter(|vpn| self.entries.remove(vpn).is_some())
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forces the next `map` invocation to return [`MapError::PermissionDenied`].
    #[cfg(feature = "failpoints")]
    pub fn deny_next_map(&mut self) {
        self.deny_next_map = true;
    }
}
