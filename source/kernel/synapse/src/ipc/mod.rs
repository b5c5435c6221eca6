// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Synchronous channel IPC engine (rendezvous send/receive, payload transfer, fast path)
//! OWNERS: @kernel-ipc-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! PUBLIC API: IpcError, IpcOutcome, Continuation, Channel, ChannelArena, Notifier;
//!             Kernel::{open, close, link, transfer, notify, ipc, ipc_fastpath, kernel_ipc}
//! DEPENDS_ON: cap::ChannelTable, task::{Thread, Process}, sched::Scheduler, mm::PageTable
//! INVARIANTS: Suspension only while waiting for a receiver (send) or a sender (receive);
//!             every resumed operation checks abort_reason first; senders on one destination
//!             are served FIFO unless a receiver is already present; page payloads move

use synapse_abi::{Errno, IpcFlags};

use crate::cap::CapError;
use crate::types::ChannelId;

pub mod channel;
mod fastpath;
pub mod header;
mod lifecycle;
mod payload;
mod recv;
mod send;
#[cfg(feature = "ipc_trace_ring")]
pub mod trace;

pub use channel::{Channel, ChannelArena, Notification, Notifier};

/// Error returned by IPC operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcError {
    /// Payload delivery could not allocate a channel in the receiver.
    OutOfMemory,
    /// Handle space or channel arena exhausted.
    OutOfResource,
    /// Handle does not name a channel of the calling process.
    InvalidCid,
    /// Channel (or its routing target) has been destroyed.
    ChannelClosed,
    /// Non-blocking send found no waiting receiver.
    WouldBlock,
    /// Receive slot of the channel is occupied.
    AlreadyReceiving,
    /// Malformed inline, channel or page descriptor.
    InvalidPayload,
    /// Receiver cannot accept the declared pages.
    InvalidPagePayload,
    /// Peer aborted after committing to the rendezvous.
    NeedsRetry,
    /// Caller cannot issue an operation in its current state.
    InvalidArg,
}

impl IpcError {
    pub const fn errno(self) -> Errno {
        match self {
            Self::OutOfMemory => Errno::OutOfMemory,
            Self::OutOfResource => Errno::OutOfResource,
            Self::InvalidCid => Errno::InvalidCid,
            Self::ChannelClosed => Errno::ChannelClosed,
            Self::WouldBlock => Errno::WouldBlock,
            Self::AlreadyReceiving => Errno::AlreadyReceiving,
            Self::InvalidPayload => Errno::InvalidPayload,
            Self::InvalidPagePayload => Errno::InvalidPagePayload,
            Self::NeedsRetry => Errno::NeedsRetry,
            Self::InvalidArg => Errno::InvalidArg,
        }
    }

    /// Negative value left in the caller's return register.
    pub const fn as_return(self) -> isize {
        self.errno().as_return()
    }
}

impl From<CapError> for IpcError {
    fn from(value: CapError) -> Self {
        match value {
            CapError::InvalidSlot => Self::InvalidCid,
            CapError::NoSpace => Self::OutOfResource,
        }
    }
}

/// How an IPC call left the calling thread.
#[must_use = "a blocked operation completes later through the thread's return slot"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcOutcome {
    /// Finished; the result is available now.
    Complete,
    /// Suspended; the result is written to the thread's return slot when it completes.
    Blocked,
    /// The calling thread was terminated (unresolvable page fault).
    Terminated,
}

/// Where a suspended operation picks up after the thread is resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// Waiting for a receiver: retry the send through `channel`, then receive if requested.
    Send { channel: ChannelId, flags: IpcFlags },
    /// Waiting for a message on `channel` (the receive endpoint), entered through `entry`.
    Recv { entry: ChannelId, channel: ChannelId },
}

impl Continuation {
    /// The channel the suspension pins.
    pub fn channel(self) -> ChannelId {
        match self {
            Self::Send { channel, .. } | Self::Recv { channel, .. } => channel,
        }
    }
}

#[cfg(test)]
mod tests_prop;
