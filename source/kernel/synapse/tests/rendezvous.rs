// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Integration tests for the send/receive rendezvous and notifications
//! OWNERS: @kernel-ipc-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//!
//! TEST_SCENARIOS:
//!   - call_reaches_waiting_receiver(): P calls on A, Q already waits on B
//!   - notifications_coalesce(): two notifies before one receive yield their union
//!   - round_trip_preserves_message(): inline payload arrives intact, reply completes the call
//!   - no_lost_wakeup_either_order(): receive-first and send-first both complete
//!   - receiver_present_sender_overtakes_queue(): delivery to a waiting receiver bypasses FIFO
//!   - queued_senders_are_fifo(): later receivers serve queued senders in arrival order
//!   - notify_wakes_waiting_receiver(): a notify on a channel with a receiver wakes it
//!   - concurrent_notifiers_merge(): notifiers on several host threads lose no bits
//!   - kernel_ipc_uses_private_buffer(): kernel-mode IPC restores the user buffer
//!   - reserved_header_bits_halt(): corrupted header is fatal

mod common;

use common::{call, ipc, recv, send, Pair};
use synapse::abi::{Errno, IpcFlags, Message, MsgHeader, NOTIFICATION_MSG};
use synapse::task::{BufferKind, ThreadState};
use synapse::{IpcOutcome, Pid, SharedKernel};

#[test]
fn call_reaches_waiting_receiver() {
    let mut w = Pair::new();
    assert_eq!(w.call(w.q, w.b, recv()), None);

    w.put(w.p, Message::inline(42, &7u32.to_le_bytes()));
    assert_eq!(w.call(w.p, w.a, call()), None);
    w.kernel.settle();

    assert_eq!(w.kernel.take_return(w.q), Some(0));
    let got = w.msg(w.q);
    assert_eq!(got.header.msg_type(), 42);
    assert_eq!(got.inline_data(), &7u32.to_le_bytes());
    assert_eq!(got.from, w.b.to_abi());

    // P now waits for the reply on A.
    let p = w.kernel.thread(w.p).unwrap();
    assert_eq!(p.state(), ThreadState::Blocked);
    assert_eq!(w.kernel.channel(w.p_pid, w.a).unwrap().receiver(), Some(w.p));
}

#[test]
fn notifications_coalesce() {
    let mut w = Pair::new();
    w.kernel.notify(w.p, w.a, 0x1).unwrap();
    w.kernel.notify(w.p, w.a, 0x4).unwrap();

    assert_eq!(w.call(w.q, w.b, recv()), Some(0));
    let got = w.msg(w.q);
    assert_eq!(got.header, MsgHeader::NOTIFICATION);
    assert_eq!(got.header.msg_type(), NOTIFICATION_MSG);
    assert_eq!(got.from, 0);
    assert_eq!(got.notification, 0x5);
    assert_eq!(w.kernel.channel(w.q_pid, w.b).unwrap().pending_notification(), 0);
}

#[test]
fn round_trip_preserves_message() {
    let mut w = Pair::new();
    let payload: Vec<u8> = (0..200u8).collect();
    let request = Message::inline(3, &payload);
    assert_eq!(w.call(w.q, w.b, recv()), None);
    w.put(w.p, request);
    assert_eq!(w.call(w.p, w.a, call()), None);
    w.kernel.settle();

    let mut expected = request;
    expected.from = w.b.to_abi();
    assert_eq!(w.msg(w.q), expected);

    w.put(w.q, Message::inline(4, b"reply"));
    assert_eq!(w.call(w.q, w.b, send()), Some(0));
    w.kernel.settle();
    assert_eq!(w.kernel.take_return(w.p), Some(0));
    let reply = w.msg(w.p);
    assert_eq!(reply.inline_data(), b"reply");
    assert_eq!(reply.from, w.a.to_abi());
    assert_eq!(w.kernel.thread(w.p).unwrap().state(), ThreadState::Runnable);
}

#[test]
fn no_lost_wakeup_either_order() {
    // Receiver first.
    let mut w = Pair::new();
    assert_eq!(w.call(w.q, w.b, recv()), None);
    w.put(w.p, Message::inline(1, b"x"));
    assert_eq!(w.call(w.p, w.a, send()), Some(0));
    w.kernel.settle();
    assert_eq!(w.kernel.take_return(w.q), Some(0));

    // Sender first.
    let mut w = Pair::new();
    w.put(w.p, Message::inline(1, b"y"));
    assert_eq!(w.call(w.p, w.a, send()), None);
    assert_eq!(w.kernel.channel(w.q_pid, w.b).unwrap().queued_senders().count(), 1);
    assert_eq!(w.call(w.q, w.b, recv()), None);
    w.kernel.settle();
    assert_eq!(w.kernel.take_return(w.p), Some(0));
    assert_eq!(w.kernel.take_return(w.q), Some(0));
    assert_eq!(w.msg(w.q).inline_data(), b"y");
}

#[test]
fn receiver_present_sender_overtakes_queue() {
    let mut w = Pair::new();
    let early = w.kernel.spawn_thread(w.p_pid).unwrap();
    let late = w.kernel.spawn_thread(w.p_pid).unwrap();

    w.put(early, Message::inline(1, b"early"));
    assert_eq!(w.call(early, w.a, send()), None);

    // The receiver wakes the queued sender, but the late sender finds the receiver first.
    assert_eq!(w.call(w.q, w.b, recv()), None);
    w.put(late, Message::inline(2, b"late"));
    assert_eq!(w.call(late, w.a, send()), Some(0));
    w.kernel.settle();
    assert_eq!(w.msg(w.q).inline_data(), b"late");
    assert_eq!(w.kernel.take_return(w.q), Some(0));
    assert_eq!(w.kernel.thread(early).unwrap().state(), ThreadState::Blocked);

    assert_eq!(w.call(w.q, w.b, recv()), None);
    w.kernel.settle();
    assert_eq!(w.msg(w.q).inline_data(), b"early");
    assert_eq!(w.kernel.take_return(early), Some(0));
}

#[test]
fn queued_senders_are_fifo() {
    let mut w = Pair::new();
    let senders: Vec<_> = (0..3).map(|_| w.kernel.spawn_thread(w.p_pid).unwrap()).collect();
    for (n, tid) in senders.iter().enumerate() {
        w.put(*tid, Message::inline(10 + n as u16, &[]));
        assert_eq!(w.call(*tid, w.a, send()), None);
    }
    for n in 0..3u16 {
        assert_eq!(w.call(w.q, w.b, recv()), None);
        w.kernel.settle();
        assert_eq!(w.kernel.take_return(w.q), Some(0));
        assert_eq!(w.msg(w.q).header.msg_type(), 10 + n);
    }
}

#[test]
fn notify_wakes_waiting_receiver() {
    let mut w = Pair::new();
    assert_eq!(w.call(w.q, w.b, recv()), None);
    w.kernel.notify(w.p, w.a, 0x20).unwrap();
    w.kernel.settle();
    assert_eq!(w.kernel.take_return(w.q), Some(0));
    let got = w.msg(w.q);
    assert_eq!(got.header, MsgHeader::NOTIFICATION);
    assert_eq!(got.notification, 0x20);
}

#[test]
fn concurrent_notifiers_merge() {
    let w = Pair::new();
    let (q, b, q_pid) = (w.q, w.b, w.q_pid);
    let (p_pid, a) = (w.p_pid, w.a);
    let shared = SharedKernel::new(w.kernel);
    assert_eq!(shared.syscall(q, &ipc(b, recv())), None);

    let notifier = shared.notifier(p_pid, a).unwrap();
    std::thread::scope(|scope| {
        for bit in 0..8u32 {
            let notifier = notifier.clone();
            scope.spawn(move || notifier.notify(1 << bit));
        }
    });

    let mut kernel = shared.lock();
    kernel.settle();
    assert_eq!(kernel.take_return(q), Some(0));
    assert_eq!(kernel.thread(q).unwrap().message().notification, 0xff);
    assert_eq!(kernel.channel(q_pid, b).unwrap().pending_notification(), 0);
}

#[test]
fn kernel_ipc_uses_private_buffer() {
    let mut w = Pair::new();
    let k = w.kernel.spawn_thread(Pid::KERNEL).unwrap();
    let kc = w.kernel.open_in(Pid::KERNEL).unwrap();
    let c = w.kernel.open(w.q).unwrap();
    w.kernel.connect((Pid::KERNEL, kc), (w.q_pid, c)).unwrap();
    w.kernel.thread_mut(k).unwrap().message_mut().from = 77;

    // Send from the kernel buffer while a receiver waits.
    assert_eq!(w.call(w.q, c, recv()), None);
    *w.kernel.thread_mut(k).unwrap().buffer_mut(BufferKind::Kernel) =
        Message::inline(5, b"kern");
    assert_eq!(w.kernel.kernel_ipc(k, kc, IpcFlags::SEND), Ok(IpcOutcome::Complete));
    assert_eq!(w.kernel.thread(k).unwrap().active_buffer(), BufferKind::User);
    w.kernel.settle();
    assert_eq!(w.msg(w.q).inline_data(), b"kern");
    assert_eq!(w.msg(w.q).from, c.to_abi());

    // A suspended kernel receive completes into the kernel buffer and restores afterwards.
    assert_eq!(w.kernel.kernel_ipc(k, kc, IpcFlags::RECV), Ok(IpcOutcome::Blocked));
    assert_eq!(w.kernel.thread(k).unwrap().active_buffer(), BufferKind::Kernel);
    w.put(w.q, Message::inline(6, b"back"));
    assert_eq!(w.call(w.q, c, send()), Some(0));
    w.kernel.settle();
    let thread = w.kernel.thread(k).unwrap();
    assert_eq!(thread.active_buffer(), BufferKind::User);
    assert_eq!(thread.buffer(BufferKind::Kernel).inline_data(), b"back");
    assert_eq!(thread.buffer(BufferKind::User).from, 77);
    assert_eq!(w.kernel.take_return(k), Some(0));
}

#[test]
fn oversized_inline_length_is_rejected() {
    let mut w = Pair::new();
    let mut msg = Message::zeroed();
    msg.header = MsgHeader::new(1, 0xfff);
    w.put(w.p, msg);
    assert_eq!(w.call(w.p, w.a, call()), Some(Errno::InvalidPayload.as_return()));
}

#[test]
#[should_panic(expected = "reserved")]
fn reserved_header_bits_halt() {
    let mut w = Pair::new();
    assert_eq!(w.call(w.q, w.b, recv()), None);
    let mut msg = Message::inline(1, b"bad");
    msg.header = MsgHeader::from_raw(msg.header.raw() | MsgHeader::RESERVED_MASK);
    w.put(w.p, msg);
    let _ = w.call(w.p, w.a, call());
}
