// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Channel lifecycle: open, close, link, transfer and notify.

use alloc::vec::Vec;

use super::{Continuation, IpcError};
use crate::kernel::Kernel;
use crate::types::{ChannelId, Cid, Pid, Tid};

impl Kernel {
    /// Opens a new self-linked channel for the caller; returns its handle.
    pub fn open(&mut self, caller: Tid) -> Result<Cid, IpcError> {
        let pid = self.caller(caller)?;
        self.create_channel(pid).map(|(_, cid)| cid)
    }

    /// Opens a channel on behalf of `pid` (kernel bootstrap, tests).
    pub fn open_in(&mut self, pid: Pid) -> Result<Cid, IpcError> {
        self.create_channel(pid).map(|(_, cid)| cid)
    }

    /// Destroys the channel named by `cid`.
    ///
    /// The handle stays reserved until no suspended operation refers to the channel anymore.
    pub fn close(&mut self, caller: Tid, cid: Cid) -> Result<(), IpcError> {
        let pid = self.caller(caller)?;
        let id = self.lookup(pid, cid)?;
        self.destroy_channel(id)
    }

    /// Links two channels of the caller so that each sends to the other.
    pub fn link(&mut self, caller: Tid, a: Cid, b: Cid) -> Result<(), IpcError> {
        let pid = self.caller(caller)?;
        let a = self.lookup(pid, a)?;
        let b = self.lookup(pid, b)?;
        self.link_ids(a, b)
    }

    /// Links channels that live in different processes (kernel wiring of servers).
    pub fn connect(&mut self, a: (Pid, Cid), b: (Pid, Cid)) -> Result<(), IpcError> {
        let a = self.lookup(a.0, a.1)?;
        let b = self.lookup(b.0, b.1)?;
        self.link_ids(a, b)
    }

    /// Redirects receives and incoming sends of `src` to wherever `dst` currently receives.
    pub fn transfer(&mut self, caller: Tid, src: Cid, dst: Cid) -> Result<(), IpcError> {
        let pid = self.caller(caller)?;
        let src = self.lookup(pid, src)?;
        let dst = self.lookup(pid, dst)?;
        let target = self.live(dst)?.transfer_to;
        self.live(src)?;
        self.channel_mut(src)?.transfer_to = target;
        log_debug!(target: "ipc", "transfer {} -> {}", src, target);
        Ok(())
    }

    /// Merges `bits` into the notification word of the destination of `cid`. Never blocks.
    pub fn notify(&mut self, caller: Tid, cid: Cid, bits: u64) -> Result<(), IpcError> {
        let pid = self.caller(caller)?;
        let ch = self.lookup(pid, cid)?;
        let dst = self.send_target(ch)?;
        self.channel_ref(dst)?.notification.merge(bits);
        log_trace!(target: "ipc", "notify {} bits={:#x}", dst, bits);
        self.wake_notified(dst);
        Ok(())
    }

    /// Allocates a channel in the arena and a handle for it in `pid`.
    pub(crate) fn create_channel(&mut self, pid: Pid) -> Result<(ChannelId, Cid), IpcError> {
        let process = self.processes.get_mut(pid).ok_or(IpcError::InvalidArg)?;
        let cid = process.channels.vacant().ok_or(IpcError::OutOfResource)?;
        let id = self.channels.alloc(pid, cid)?;
        if let Err(err) = process.channels.insert(cid, id) {
            self.channels.release(id);
            return Err(err.into());
        }
        #[cfg(feature = "ipc_trace_ring")]
        super::trace::record_open(pid, cid);
        log_debug!(target: "ipc", "open pid={} {} -> {}", pid, cid, id);
        Ok((id, cid))
    }

    /// Marks `id` destructed and fails every thread waiting on or through it.
    pub(crate) fn destroy_channel(&mut self, id: ChannelId) -> Result<(), IpcError> {
        let ch = self.channels.get_mut(id).ok_or(IpcError::ChannelClosed)?;
        if ch.destructed {
            return Err(IpcError::ChannelClosed);
        }
        ch.destructed = true;
        let mut waiters: Vec<Tid> = ch.receiver.take().into_iter().collect();
        waiters.extend(ch.wait_queue.drain(..));
        let (owner, cid) = (ch.owner, ch.cid);

        // Threads blocked elsewhere while operating through this channel: senders queued on
        // a destination, receivers waiting on the target of a transfer.
        let through: Vec<(Tid, Option<ChannelId>)> = self
            .threads
            .iter()
            .filter(|t| t.is_blocked())
            .filter(|t| match t.pending {
                Some(Continuation::Send { channel, .. }) => channel == id,
                Some(Continuation::Recv { entry, channel }) => entry == id && channel != id,
                None => false,
            })
            .map(|t| (t.tid(), t.blocked_on))
            .collect();
        for (tid, blocked_on) in through {
            if let Some(other) = blocked_on.and_then(|q| self.channels.get_mut(q)) {
                other.wait_queue.retain(|queued| *queued != tid);
                if other.receiver == Some(tid) {
                    other.receiver = None;
                }
            }
            if !waiters.contains(&tid) {
                waiters.push(tid);
            }
        }
        for tid in waiters {
            self.abort(tid, IpcError::ChannelClosed);
        }
        #[cfg(feature = "ipc_trace_ring")]
        super::trace::record_close(owner, cid);
        log_debug!(target: "ipc", "close pid={} {} ({})", owner, cid, id);

        if self.channel_ref(id)?.pins == 0 {
            self.reclaim(id);
        }
        Ok(())
    }

    /// Frees the arena slot of a destructed channel and its handle in the owning process.
    pub(crate) fn reclaim(&mut self, id: ChannelId) {
        let Some(channel) = self.channels.release(id) else {
            return;
        };
        // The owner may already be gone (process teardown).
        if let Some(process) = self.processes.get_mut(channel.owner) {
            if process.channels.get(channel.cid) == Ok(id) {
                let _ = process.channels.release(channel.cid);
            }
        }
        log_trace!(target: "ipc", "reclaim {} pid={} {}", id, channel.owner, channel.cid);
    }

    pub(crate) fn link_ids(&mut self, a: ChannelId, b: ChannelId) -> Result<(), IpcError> {
        self.live(a)?;
        self.live(b)?;
        self.channel_mut(a)?.linked_with = b;
        self.channel_mut(b)?.linked_with = a;
        log_debug!(target: "ipc", "link {} <-> {}", a, b);
        Ok(())
    }

    /// Returns the channel if it exists and is not destructed.
    pub(crate) fn live(&self, id: ChannelId) -> Result<&super::Channel, IpcError> {
        let ch = self.channel_ref(id)?;
        if ch.destructed {
            return Err(IpcError::ChannelClosed);
        }
        Ok(ch)
    }
}

#[cfg(test)]
mod tests {
    use synapse_abi::{syscall as nr, IpcFlags};

    use crate::config::KernelConfig;
    use crate::ipc::IpcError;
    use crate::kernel::Kernel;
    use crate::syscall::Args;
    use crate::task::ThreadState;

    #[test]
    fn registry_exhaustion_is_out_of_resource() {
        let mut kernel = Kernel::new(KernelConfig::DEFAULT.with_channels_per_process(2));
        let pid = kernel.create_process().unwrap();
        let tid = kernel.spawn_thread(pid).unwrap();
        assert_eq!(kernel.open(tid).unwrap().as_raw(), 1);
        assert_eq!(kernel.open(tid).unwrap().as_raw(), 2);
        assert_eq!(kernel.open(tid), Err(IpcError::OutOfResource));
    }

    #[test]
    fn arena_exhaustion_is_out_of_resource() {
        let mut kernel = Kernel::new(KernelConfig::DEFAULT.with_max_channels(1));
        let a = kernel.create_process().unwrap();
        let b = kernel.create_process().unwrap();
        kernel.open_in(a).unwrap();
        assert_eq!(kernel.open_in(b), Err(IpcError::OutOfResource));
        assert!(kernel.process(b).unwrap().channels().is_empty());
    }

    #[test]
    fn unpinned_close_frees_handle_and_slot() {
        let mut kernel = Kernel::new(KernelConfig::DEFAULT);
        let pid = kernel.create_process().unwrap();
        let tid = kernel.spawn_thread(pid).unwrap();
        let cid = kernel.open(tid).unwrap();
        kernel.close(tid, cid).unwrap();
        assert_eq!(kernel.close(tid, cid), Err(IpcError::InvalidCid));
        assert_eq!(kernel.channel_count(), 0);
        assert_eq!(kernel.open(tid), Ok(cid));
    }

    #[test]
    fn transfer_follows_the_target_chain() {
        let mut kernel = Kernel::new(KernelConfig::DEFAULT);
        let pid = kernel.create_process().unwrap();
        let tid = kernel.spawn_thread(pid).unwrap();
        let a = kernel.open(tid).unwrap();
        let b = kernel.open(tid).unwrap();
        let c = kernel.open(tid).unwrap();
        kernel.transfer(tid, b, c).unwrap();
        kernel.transfer(tid, a, b).unwrap();
        let c_id = kernel.process(pid).unwrap().channels().get(c).unwrap();
        assert_eq!(kernel.channel(pid, a).unwrap().transfer_to(), c_id);
    }

    #[test]
    fn polling_waits_for_a_raised_notifier() {
        let mut kernel = Kernel::new(KernelConfig::DEFAULT);
        let pid = kernel.create_process().unwrap();
        let tid = kernel.spawn_thread(pid).unwrap();
        let cid = kernel.open(tid).unwrap();
        let recv = Args::call(nr::IPC, IpcFlags::RECV, cid.as_raw() as usize, 0);
        assert_eq!(kernel.syscall(tid, &recv), None);

        // Bits merged behind the kernel's back are not picked up by a poll alone.
        let id = kernel.process(pid).unwrap().channels().get(cid).unwrap();
        kernel.channels.get(id).unwrap().notification.merge(0x2);
        kernel.poll_notifications();
        assert_eq!(kernel.thread(tid).unwrap().state(), ThreadState::Blocked);

        kernel.notifier(pid, cid).unwrap().notify(0x1);
        kernel.poll_notifications();
        assert_eq!(kernel.thread(tid).unwrap().state(), ThreadState::Runnable);
        assert_eq!(kernel.thread(tid).unwrap().message().notification, 0x3);
    }
}
