// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Per-process channel registry (handle -> channel translation)
//! OWNERS: @kernel-cap-team
//! PUBLIC API: ChannelTable, CapError
//! DEPENDS_ON: types::{Cid, ChannelId}
//! INVARIANTS: Handles start at 1; a handle is only reusable after `release`; bounded capacity

use alloc::vec::Vec;

use crate::types::{ChannelId, Cid};

/// Errors produced when manipulating the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapError {
    /// Handle does not name a live slot.
    InvalidSlot,
    /// No free handle is available.
    NoSpace,
}

/// Channel handles owned by one process. Handle `n` lives in slot `n - 1`.
#[derive(Default, Clone)]
pub struct ChannelTable {
    slots: Vec<Option<ChannelId>>,
}

impl ChannelTable {
    /// Creates an empty table with `slots` handles.
    pub fn with_capacity(slots: usize) -> Self {
        let slots = slots.min(Cid::MAX as usize);
        let mut table = Vec::with_capacity(slots);
        table.resize(slots, None);
        Self { slots: table }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Lowest free handle, if any.
    pub fn vacant(&self) -> Option<Cid> {
        self.slots
            .iter()
            .position(Option::is_none)
            .and_then(|index| Cid::new(index as u32 + 1))
    }

    /// Stores `channel` under `cid`. The slot must be free.
    pub fn insert(&mut self, cid: Cid, channel: ChannelId) -> Result<(), CapError> {
        let entry = self.slot_mut(cid)?;
        if entry.is_some() {
            return Err(CapError::InvalidSlot);
        }
        *entry = Some(channel);
        Ok(())
    }

    /// Resolves a handle.
    pub fn get(&self, cid: Cid) -> Result<ChannelId, CapError> {
        self.slots
            .get(cid.as_raw() as usize - 1)
            .and_then(|entry| *entry)
            .ok_or(CapError::InvalidSlot)
    }

    /// Frees a handle and returns the channel it named.
    pub fn release(&mut self, cid: Cid) -> Result<ChannelId, CapError> {
        self.slot_mut(cid)?.take().ok_or(CapError::InvalidSlot)
    }

    /// Iterates over live handles.
    pub fn iter(&self) -> impl Iterator<Item = (Cid, ChannelId)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, entry)| {
            let id = (*entry)?;
            Cid::new(index as u32 + 1).map(|cid| (cid, id))
        })
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|entry| entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot_mut(&mut self, cid: Cid) -> Result<&mut Option<ChannelId>, CapError> {
        self.slots.get_mut(cid.as_raw() as usize - 1).ok_or(CapError::InvalidSlot)
    }
}

#[cfg(test)]
mod tests_prop;
