// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: General IPC path: call entry points and the send half of the rendezvous
//! OWNERS: @kernel-ipc-team
//! INVARIANTS: A sender only suspends while no receiver waits on its destination; a resumed
//!             sender consumes abort_reason before retrying; a receiver that was dequeued is
//!             always resumed (with the message or with an injected error)

use synapse_abi::IpcFlags;

use super::{header, Continuation, IpcError, IpcOutcome};
use crate::kernel::Kernel;
use crate::task::BufferKind;
use crate::types::{ChannelId, Cid, Tid};

impl Kernel {
    /// Sends and/or receives on `cid` as selected by `flags`.
    ///
    /// `Blocked` means the result is delivered later through [`Kernel::take_return`].
    pub fn ipc(&mut self, caller: Tid, cid: Cid, flags: IpcFlags) -> Result<IpcOutcome, IpcError> {
        self.caller(caller)?;
        self.ipc_general(caller, cid, flags)
    }

    /// Runs an IPC operation on the kernel-private buffer of `tid`.
    ///
    /// The user buffer becomes active again once the operation completes, also when it
    /// completes after a suspension.
    pub fn kernel_ipc(
        &mut self,
        tid: Tid,
        cid: Cid,
        flags: IpcFlags,
    ) -> Result<IpcOutcome, IpcError> {
        self.caller(tid)?;
        let thread = self.thread_entry(tid)?;
        thread.active = BufferKind::Kernel;
        thread.in_kernel_ipc = true;
        let result = self.ipc_general(tid, cid, flags);
        if result != Ok(IpcOutcome::Blocked) {
            let thread = self.thread_entry(tid)?;
            thread.active = BufferKind::User;
            thread.in_kernel_ipc = false;
        }
        result
    }

    pub(crate) fn ipc_general(
        &mut self,
        tid: Tid,
        cid: Cid,
        flags: IpcFlags,
    ) -> Result<IpcOutcome, IpcError> {
        let pid = self.thread_ref(tid)?.pid();
        let ch = self.lookup(pid, cid)?;
        // A closed handle stays resolvable while pinned; it still refuses new operations.
        self.live(ch)?;
        if flags.contains(IpcFlags::SEND) {
            match self.send(tid, ch, flags)? {
                IpcOutcome::Complete => {}
                suspended => return Ok(suspended),
            }
        }
        if flags.contains(IpcFlags::RECV) {
            return self.recv(tid, ch);
        }
        Ok(IpcOutcome::Complete)
    }

    /// Destination of sends (and notifications) through `ch`: `ch.linked_with.transfer_to`.
    pub(crate) fn send_target(&self, ch: ChannelId) -> Result<ChannelId, IpcError> {
        let linked = self.live(ch)?.linked_with;
        let dst = self.channel_ref(linked)?.transfer_to;
        self.live(dst)?;
        Ok(dst)
    }

    pub(crate) fn send(
        &mut self,
        tid: Tid,
        ch: ChannelId,
        flags: IpcFlags,
    ) -> Result<IpcOutcome, IpcError> {
        header::validate_send(self.thread_ref(tid)?.message().header)?;
        let dst = self.send_target(ch)?;
        match self.channel_mut(dst)?.receiver.take() {
            Some(receiver) => self.deliver(tid, ch, receiver),
            None if flags.contains(IpcFlags::NOBLOCK) => Err(IpcError::WouldBlock),
            None => {
                self.channel_mut(dst)?.wait_queue.push_back(tid);
                self.thread_entry(tid)?.blocked_on = Some(dst);
                self.park(tid, Continuation::Send { channel: ch, flags });
                log_trace!(target: "ipc", "send tid={} queued on {}", tid, dst);
                Ok(IpcOutcome::Blocked)
            }
        }
    }

    /// Continuation of a sender woken by a receiver (or by an abort).
    ///
    /// A receiver that woke this sender and is still waiting afterwards is handed on to the
    /// next queued sender, so a failed retry never strands the rest of the queue.
    pub(crate) fn resume_send(
        &mut self,
        tid: Tid,
        ch: ChannelId,
        flags: IpcFlags,
    ) -> Result<IpcOutcome, IpcError> {
        let thread = self.thread_entry(tid)?;
        thread.blocked_on = None;
        let handoff = thread.handoff.take();
        let sent = match thread.take_abort() {
            Some(reason) => Err(reason),
            None => self.send(tid, ch, flags),
        };
        if let Some(recv_ch) = handoff {
            self.pass_receiver(recv_ch);
        }
        match sent? {
            IpcOutcome::Complete => {}
            suspended => return Ok(suspended),
        }
        if flags.contains(IpcFlags::RECV) {
            return self.recv(tid, ch);
        }
        Ok(IpcOutcome::Complete)
    }

    /// Moves the message of `sender` into the dequeued `receiver` and wakes it.
    pub(crate) fn deliver(
        &mut self,
        sender: Tid,
        ch: ChannelId,
        receiver: Tid,
    ) -> Result<IpcOutcome, IpcError> {
        let src = *self.thread_ref(sender)?.message();
        self.copy_inline(ch, &src, receiver)?;
        if let Err(abort) = self.transfer_payloads(sender, receiver, &src) {
            self.abort(receiver, IpcError::NeedsRetry);
            return abort.into_outcome(self, sender);
        }
        #[cfg(feature = "ipc_trace_ring")]
        super::trace::record_deliver(sender, receiver, src.header);
        log_trace!(
            target: "ipc",
            "deliver tid={} -> tid={} type={} len={}",
            sender,
            receiver,
            src.header.msg_type(),
            src.header.inline_len()
        );
        self.wake(receiver);
        Ok(IpcOutcome::Complete)
    }

    /// Copies header and inline bytes and stamps the source handle (`ch.linked_with`).
    pub(crate) fn copy_inline(
        &mut self,
        ch: ChannelId,
        src: &synapse_abi::Message,
        receiver: Tid,
    ) -> Result<(), IpcError> {
        let linked = self.channel_ref(ch)?.linked_with;
        let from = self.channel_ref(linked)?.cid;
        let dst = self.thread_entry(receiver)?.message_mut();
        let inline = src.inline_data();
        dst.header = src.header;
        dst.from = from.to_abi();
        dst.notification = 0;
        dst.data[..inline.len()].copy_from_slice(inline);
        Ok(())
    }
}
