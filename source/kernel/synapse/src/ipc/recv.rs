// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Receive half of the rendezvous.

use synapse_abi::MsgHeader;

use super::{Continuation, IpcError, IpcOutcome};
use crate::kernel::Kernel;
use crate::types::{ChannelId, Tid};

impl Kernel {
    pub(crate) fn recv(&mut self, tid: Tid, ch: ChannelId) -> Result<IpcOutcome, IpcError> {
        let recv_ch = self.live(ch)?.transfer_to;
        let channel = self.live(recv_ch)?;
        if channel.receiver.is_some() {
            return Err(IpcError::AlreadyReceiving);
        }

        // Pending notifications bypass the rendezvous.
        let bits = channel.notification.take();
        if bits != 0 {
            let msg = self.thread_entry(tid)?.message_mut();
            msg.header = MsgHeader::NOTIFICATION;
            msg.from = 0;
            msg.notification = bits;
            log_trace!(target: "ipc", "recv tid={} notification bits={:#x}", tid, bits);
            return Ok(IpcOutcome::Complete);
        }

        let channel = self.channel_mut(recv_ch)?;
        channel.receiver = Some(tid);
        let sender = channel.wait_queue.pop_front();
        self.thread_entry(tid)?.blocked_on = Some(recv_ch);
        self.park(tid, Continuation::Recv { entry: ch, channel: recv_ch });
        if let Some(sender) = sender {
            self.hand_off(sender, recv_ch);
        }
        Ok(IpcOutcome::Blocked)
    }

    /// Wakes the dequeued `sender` to fill the receiver slot of `recv_ch`.
    fn hand_off(&mut self, sender: Tid, recv_ch: ChannelId) {
        if let Some(thread) = self.threads.get_mut(sender) {
            thread.handoff = Some(recv_ch);
        }
        log_trace!(target: "ipc", "{} hands its receiver to sender tid={}", recv_ch, sender);
        self.wake(sender);
    }

    /// Hands a receiver slot that a woken sender left unused to the next queued sender.
    pub(crate) fn pass_receiver(&mut self, recv_ch: ChannelId) {
        let Some(ch) = self.channels.get_mut(recv_ch) else {
            return;
        };
        if ch.destructed || ch.receiver.is_none() {
            return;
        }
        if let Some(next) = ch.wait_queue.pop_front() {
            self.hand_off(next, recv_ch);
        }
    }

    /// Continuation of a receiver woken by a sender, a notification or an abort.
    pub(crate) fn resume_recv(
        &mut self,
        tid: Tid,
        recv_ch: ChannelId,
    ) -> Result<IpcOutcome, IpcError> {
        let thread = self.thread_entry(tid)?;
        thread.blocked_on = None;
        if let Some(reason) = thread.take_abort() {
            return Err(reason);
        }
        // Bits raised between the wake-up and now.
        let bits = self.channel_ref(recv_ch).map(|ch| ch.notification.take()).unwrap_or(0);
        self.thread_entry(tid)?.message_mut().notification |= bits;
        Ok(IpcOutcome::Complete)
    }
}
