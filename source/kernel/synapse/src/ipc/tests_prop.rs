// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for the IPC engine
//! OWNERS: @kernel-ipc-team
//! NOTE: Tests only; no kernel logic.
//!
//! TEST_SCENARIOS:
//!   - fastpath_matches_general_path(): a combined call leaves identical buffers, thread states
//!     and return values whether or not the fast path is enabled
//!   - pinned_handles_are_not_reused(): a handle whose channel is still referenced by a
//!     suspended thread is never handed out by open

use alloc::vec::Vec;

use proptest::prelude::*;
use synapse_abi::{syscall as nr, IpcFlags, Message, MsgHeader, INLINE_DATA_MAX};

use crate::config::KernelConfig;
use crate::kernel::Kernel;
use crate::syscall::Args;
use crate::task::ThreadState;
use crate::types::{ChannelId, Cid, Tid};

#[derive(Debug, Clone)]
struct Combined {
    ty: u16,
    payload: Vec<u8>,
    oversized: bool,
    queued_sender: bool,
    receiver_waiting: bool,
    pending_bits: u64,
}

fn arb_combined() -> impl Strategy<Value = Combined> {
    (
        any::<u16>(),
        prop::collection::vec(any::<u8>(), 0..=INLINE_DATA_MAX),
        prop::bool::weighted(0.1),
        prop::bool::weighted(0.2),
        prop::bool::weighted(0.8),
        prop_oneof![3 => Just(0u64), 1 => 1u64..u64::MAX],
    )
        .prop_map(|(ty, payload, oversized, queued_sender, receiver_waiting, pending_bits)| {
            Combined { ty, payload, oversized, queued_sender, receiver_waiting, pending_bits }
        })
}

#[derive(Debug, PartialEq, Eq)]
struct Observed {
    call: Option<isize>,
    buffers: Vec<Message>,
    states: Vec<ThreadState>,
    returns: Vec<Option<isize>>,
    blocked_on: Vec<Option<ChannelId>>,
    receivers: Vec<Option<Tid>>,
}

fn ipc_args(cid: Cid, flags: IpcFlags) -> Args {
    Args::call(nr::IPC, flags, cid.as_raw() as usize, 0)
}

/// P holds A, Q holds B, A and B are linked. Q (thread `q`) optionally waits on B, a second
/// Q thread optionally queues a send towards A, and bits may already be pending on A.
fn run(case: &Combined, fastpath: bool) -> Observed {
    let mut kernel = Kernel::new(KernelConfig::DEFAULT.with_fastpath(fastpath));
    let p_pid = kernel.create_process().unwrap();
    let q_pid = kernel.create_process().unwrap();
    let p = kernel.spawn_thread(p_pid).unwrap();
    let q = kernel.spawn_thread(q_pid).unwrap();
    let q2 = kernel.spawn_thread(q_pid).unwrap();
    let a = kernel.open_in(p_pid).unwrap();
    let b = kernel.open_in(q_pid).unwrap();
    kernel.connect((p_pid, a), (q_pid, b)).unwrap();

    if case.receiver_waiting {
        assert_eq!(kernel.syscall(q, &ipc_args(b, IpcFlags::RECV)), None);
    }
    if case.pending_bits != 0 {
        kernel.notify(q2, b, case.pending_bits).unwrap();
    }
    if case.queued_sender {
        *kernel.thread_mut(q2).unwrap().message_mut() = Message::inline(9, b"queued");
        assert_eq!(kernel.syscall(q2, &ipc_args(b, IpcFlags::SEND)), None);
    }

    let mut msg = Message::inline(case.ty, &case.payload);
    if case.oversized {
        msg.header = MsgHeader::new(case.ty, INLINE_DATA_MAX + 1);
    }
    *kernel.thread_mut(p).unwrap().message_mut() = msg;
    let call = kernel.syscall(p, &ipc_args(a, IpcFlags::SEND | IpcFlags::RECV));
    kernel.settle();

    let tids = [p, q, q2];
    let a_id = kernel.lookup(p_pid, a).unwrap();
    let b_id = kernel.lookup(q_pid, b).unwrap();
    Observed {
        call,
        buffers: tids.iter().map(|t| *kernel.thread(*t).unwrap().message()).collect(),
        states: tids.iter().map(|t| kernel.thread(*t).unwrap().state()).collect(),
        returns: tids.iter().map(|t| kernel.take_return(*t)).collect(),
        blocked_on: tids.iter().map(|t| kernel.thread(*t).unwrap().blocked_on()).collect(),
        receivers: [a_id, b_id]
            .iter()
            .map(|id| kernel.channel_by_id(*id).unwrap().receiver())
            .collect(),
    }
}

proptest! {
    #[test]
    fn fastpath_matches_general_path(case in arb_combined()) {
        let fast = run(&case, true);
        let general = run(&case, false);
        prop_assert_eq!(fast, general);
    }

    #[test]
    fn pinned_handles_are_not_reused(ops in prop::collection::vec(0u8..4, 1..48)) {
        let mut kernel = Kernel::new(KernelConfig::DEFAULT.with_channels_per_process(4));
        let pid = kernel.create_process().unwrap();
        let owner = kernel.spawn_thread(pid).unwrap();
        let mut live: Vec<Cid> = Vec::new();
        for op in ops {
            match op {
                0 => {
                    if let Ok(cid) = kernel.open(owner) {
                        // The new handle must not name a channel some thread still refers to.
                        let pinned = kernel
                            .threads
                            .iter()
                            .filter_map(|t| t.pending)
                            .filter_map(|cont| kernel.channel_by_id(cont.channel()))
                            .any(|ch| ch.is_destructed() && ch.cid() == cid);
                        prop_assert!(!pinned);
                        live.push(cid);
                    }
                }
                1 => {
                    if let Some(cid) = live.pop() {
                        kernel.close(owner, cid).unwrap();
                    }
                }
                2 => {
                    if let Some(cid) = live.last().copied() {
                        if let Ok(waiter) = kernel.spawn_thread(pid) {
                            let _ = kernel.syscall(waiter, &ipc_args(cid, IpcFlags::RECV));
                        }
                    }
                }
                _ => {
                    kernel.settle();
                }
            }
            for thread in kernel.threads.iter() {
                if let Some(cont) = thread.pending {
                    prop_assert!(kernel.channel_by_id(cont.channel()).is_some());
                }
            }
        }
    }
}
