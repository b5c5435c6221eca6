// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Channel objects, the global channel arena and notification words
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: Channel, ChannelArena, Notification, Notifier
//! DEPENDS_ON: types::{ChannelId, Cid, Pid, Tid}
//! INVARIANTS: linked_with/transfer_to always hold an id (possibly the channel itself);
//!             at most one receiver; a slot is only reused after its generation is bumped;
//!             destructed slots stay allocated while pinned

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::IpcError;
use crate::types::{ChannelId, Cid, Pid, Tid};

/// Accumulated notification bits of one channel.
#[derive(Debug, Default)]
pub struct Notification {
    bits: AtomicU64,
}

impl Notification {
    /// Merges `bits`; returns the previous value.
    #[inline]
    pub fn merge(&self, bits: u64) -> u64 {
        self.bits.fetch_or(bits, Ordering::AcqRel)
    }

    /// Reads and clears the pending bits.
    #[inline]
    pub fn take(&self) -> u64 {
        self.bits.swap(0, Ordering::AcqRel)
    }

    #[inline]
    pub fn peek(&self) -> u64 {
        self.bits.load(Ordering::Acquire)
    }
}

/// Lock-free handle for raising notifications from contexts that must never block.
///
/// The destination is resolved when the notifier is created; later `link`/`transfer` calls do
/// not retarget it. Receivers already waiting are woken on the next scheduling pass, which
/// only scans the arena after some notifier raised the kernel's `raised` flag.
#[derive(Debug, Clone)]
pub struct Notifier {
    target: Arc<Notification>,
    raised: Arc<AtomicBool>,
}

impl Notifier {
    pub(crate) fn new(target: Arc<Notification>, raised: Arc<AtomicBool>) -> Self {
        Self { target, raised }
    }

    #[inline]
    pub fn notify(&self, bits: u64) {
        self.target.merge(bits);
        self.raised.store(true, Ordering::Release);
    }
}

/// A channel endpoint.
#[derive(Debug)]
pub struct Channel {
    pub(crate) cid: Cid,
    pub(crate) owner: Pid,
    pub(crate) linked_with: ChannelId,
    pub(crate) transfer_to: ChannelId,
    pub(crate) receiver: Option<Tid>,
    pub(crate) wait_queue: VecDeque<Tid>,
    pub(crate) notification: Arc<Notification>,
    pub(crate) destructed: bool,
    /// Suspended operations still referring to this channel.
    pub(crate) pins: u32,
}

impl Channel {
    fn new(id: ChannelId, owner: Pid, cid: Cid) -> Self {
        Self {
            cid,
            owner,
            linked_with: id,
            transfer_to: id,
            receiver: None,
            wait_queue: VecDeque::new(),
            notification: Arc::new(Notification::default()),
            destructed: false,
            pins: 0,
        }
    }

    pub fn cid(&self) -> Cid {
        self.cid
    }

    pub fn owner(&self) -> Pid {
        self.owner
    }

    pub fn linked_with(&self) -> ChannelId {
        self.linked_with
    }

    pub fn transfer_to(&self) -> ChannelId {
        self.transfer_to
    }

    pub fn receiver(&self) -> Option<Tid> {
        self.receiver
    }

    /// Senders waiting for a receiver, in arrival order.
    pub fn queued_senders(&self) -> impl Iterator<Item = Tid> + '_ {
        self.wait_queue.iter().copied()
    }

    pub fn pending_notification(&self) -> u64 {
        self.notification.peek()
    }

    pub fn is_destructed(&self) -> bool {
        self.destructed
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    channel: Option<Channel>,
}

/// Global arena of channels addressed by [`ChannelId`].
#[derive(Debug)]
pub struct ChannelArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    limit: usize,
}

impl ChannelArena {
    pub fn new(limit: usize) -> Self {
        Self { slots: Vec::new(), free: Vec::new(), limit: limit.min(u32::MAX as usize) }
    }

    /// Allocates a self-linked channel owned by `owner` under handle `cid`.
    pub fn alloc(&mut self, owner: Pid, cid: Cid) -> Result<ChannelId, IpcError> {
        let index = match self.free.pop() {
            Some(index) => index,
            None if self.slots.len() < self.limit => {
                self.slots.push(Slot { generation: 0, channel: None });
                (self.slots.len() - 1) as u32
            }
            None => return Err(IpcError::OutOfResource),
        };
        let slot = &mut self.slots[index as usize];
        let id = ChannelId::new(index, slot.generation);
        slot.channel = Some(Channel::new(id, owner, cid));
        Ok(id)
    }

    /// Returns the channel if `id` still names a live slot.
    pub fn get(&self, id: ChannelId) -> Option<&Channel> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.channel.as_ref())
    }

    pub fn get_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.channel.as_mut())
    }

    /// Frees the slot of `id` and invalidates every outstanding copy of the id.
    pub fn release(&mut self, id: ChannelId) -> Option<Channel> {
        let slot = self
            .slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation())?;
        let channel = slot.channel.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index() as u32);
        Some(channel)
    }

    /// Number of slots ever allocated, live or free.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Id of the live channel in slot `index`, if any.
    pub fn id_at(&self, index: usize) -> Option<ChannelId> {
        let slot = self.slots.get(index)?;
        slot.channel.as_ref().map(|_| ChannelId::new(index as u32, slot.generation))
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.channel.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
