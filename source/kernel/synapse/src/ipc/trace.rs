// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Low-noise, bounded IPC trace ring for bring-up triage
//! OWNERS: @kernel-ipc-team
//! STATUS: Experimental (feature `ipc_trace_ring`)
//! API_STABILITY: Unstable
//!
//! Records a fixed number of IPC events in memory and emits nothing unless dumped.

use alloc::vec::Vec;

use spin::Mutex;
use synapse_abi::MsgHeader;

use crate::types::{Cid, Pid, Tid};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceEvent {
    /// Monotonic sequence number (wraps).
    pub seq: u32,
    pub kind: u8,
    /// Process (open/close) or sending thread (deliver).
    pub subject: u32,
    /// Handle (open/close) or receiving thread (deliver).
    pub object: u32,
    /// Raw message header, 0 when not applicable.
    pub header: u32,
}

impl TraceEvent {
    pub const fn empty() -> Self {
        Self { seq: 0, kind: 0, subject: 0, object: 0, header: 0 }
    }
}

pub const KIND_OPEN: u8 = 1;
pub const KIND_CLOSE: u8 = 2;
pub const KIND_DELIVER: u8 = 3;

// Must stay a power of two.
const RING_SIZE: usize = 256;
const RING_MASK: usize = RING_SIZE - 1;

struct Ring {
    next: usize,
    events: [TraceEvent; RING_SIZE],
}

static RING: Mutex<Ring> = Mutex::new(Ring { next: 0, events: [TraceEvent::empty(); RING_SIZE] });

fn push(mut ev: TraceEvent) {
    let mut ring = RING.lock();
    let seq = ring.next;
    ev.seq = seq as u32;
    ring.events[seq & RING_MASK] = ev;
    ring.next = seq.wrapping_add(1);
}

pub fn record_open(pid: Pid, cid: Cid) {
    push(TraceEvent {
        kind: KIND_OPEN,
        subject: pid.as_raw(),
        object: cid.as_raw(),
        ..TraceEvent::empty()
    });
}

pub fn record_close(pid: Pid, cid: Cid) {
    push(TraceEvent {
        kind: KIND_CLOSE,
        subject: pid.as_raw(),
        object: cid.as_raw(),
        ..TraceEvent::empty()
    });
}

pub fn record_deliver(sender: Tid, receiver: Tid, header: MsgHeader) {
    push(TraceEvent {
        kind: KIND_DELIVER,
        subject: sender.as_index() as u32,
        object: receiver.as_index() as u32,
        header: header.raw(),
        ..TraceEvent::empty()
    });
}

/// Recorded events, oldest first.
pub fn snapshot() -> Vec<TraceEvent> {
    let ring = RING.lock();
    let count = ring.next.min(RING_SIZE);
    let first = ring.next - count;
    (first..ring.next).map(|seq| ring.events[seq & RING_MASK]).collect()
}

/// Writes the ring through the log sink.
pub fn dump(tag: &str) {
    let events = snapshot();
    log_info!(target: "ipc-trace", "dump tag={} events={}", tag, events.len());
    for ev in events {
        log_info!(
            target: "ipc-trace",
            "#{} kind={} subject={} object={} header={:#010x}",
            ev.seq,
            ev.kind,
            ev.subject,
            ev.object,
            ev.header
        );
    }
}
