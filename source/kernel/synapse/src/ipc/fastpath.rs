// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Combined send+receive fast path with direct switch into the waiting receiver
//! OWNERS: @kernel-ipc-team
//! INVARIANTS: Taken only when every precondition holds (violations counted, not
//!             short-circuited); otherwise the general path runs unchanged. State after the
//!             fast path equals general send followed by general receive.

use synapse_abi::IpcFlags;

use super::{Continuation, IpcError, IpcOutcome};
use crate::kernel::Kernel;
use crate::types::{ChannelId, Cid, Tid};

/// Channels involved in a combined call on `ch`.
struct Route {
    ch: ChannelId,
    recv_ch: ChannelId,
    dst: ChannelId,
}

impl Kernel {
    /// `ipc(cid, SEND | RECV)` from user mode.
    pub fn ipc_fastpath(&mut self, caller: Tid, cid: Cid) -> Result<IpcOutcome, IpcError> {
        self.caller(caller)?;
        match self.fastpath_route(caller, cid) {
            Some(route) => self.fastpath_switch(caller, route),
            None => self.ipc_general(caller, cid, IpcFlags::SEND | IpcFlags::RECV),
        }
    }

    /// Returns the route if every fast-path precondition holds.
    fn fastpath_route(&self, caller: Tid, cid: Cid) -> Option<Route> {
        if !self.config().fastpath {
            return None;
        }
        let thread = self.thread_ref(caller).ok()?;
        if thread.uses_kernel_buffer() {
            return None;
        }
        let ch_id = self.lookup(thread.pid(), cid).ok()?;
        let ch = self.channels.get(ch_id)?;
        let recv = self.channels.get(ch.transfer_to)?;
        let linked = self.channels.get(ch.linked_with)?;
        let dst = self.channels.get(linked.transfer_to)?;

        let violations = u32::from(!thread.message().header.is_inline_only())
            + u32::from(ch.destructed)
            + u32::from(recv.destructed)
            + u32::from(dst.destructed)
            + u32::from(recv.notification.peek() != 0)
            + u32::from(recv.receiver.is_some())
            + u32::from(!recv.wait_queue.is_empty())
            + u32::from(dst.receiver.is_none());
        if violations != 0 {
            return None;
        }
        Some(Route { ch: ch_id, recv_ch: ch.transfer_to, dst: linked.transfer_to })
    }

    fn fastpath_switch(&mut self, caller: Tid, route: Route) -> Result<IpcOutcome, IpcError> {
        let receiver = self.channel_mut(route.dst)?.receiver.take().ok_or(IpcError::InvalidArg)?;
        let src = *self.thread_ref(caller)?.message();
        self.copy_inline(route.ch, &src, receiver)?;

        self.channel_mut(route.recv_ch)?.receiver = Some(caller);
        self.thread_entry(caller)?.blocked_on = Some(route.recv_ch);
        self.thread_entry(receiver)?.blocked_on = None;
        self.suspend(caller, Continuation::Recv { entry: route.ch, channel: route.recv_ch });
        self.scheduler.direct_switch(&mut self.threads, caller, receiver);
        log_trace!(target: "ipc", "fastpath tid={} -> tid={}", caller, receiver);

        // The receiver runs now; finish its receive before returning to it.
        self.drive(receiver);
        Ok(IpcOutcome::Blocked)
    }
}
