// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: SYNAPSE kernel core: channel IPC engine with its scheduler and page-table collaborators
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! PUBLIC API: Kernel, SharedKernel, KernelConfig, abi (synapse-abi), log_* macros
//! DEPENDS_ON: synapse-abi, bitflags, spin, static_assertions
//!
//! The core is free of architecture code: the trap path hands syscalls to [`Kernel::syscall`]
//! and runs [`Kernel::schedule`] on exit, so the whole engine also runs in host tests.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), forbid(clippy::unwrap_used))]

extern crate alloc;

#[macro_use]
mod diag;

pub mod cap;
pub mod config;
pub mod ipc;
mod kernel;
pub mod mm;
pub mod sched;
pub mod syscall;
pub mod task;
pub mod types;

pub use diag::log;
pub use synapse_abi as abi;

pub use config::KernelConfig;
pub use ipc::{IpcError, IpcOutcome, Notifier};
pub use kernel::{Kernel, SharedKernel};
pub use syscall::Args;
pub use types::{ChannelId, Cid, PhysAddr, Pid, Tid, VirtAddr};

static_assertions::const_assert_eq!(core::mem::size_of::<abi::Message>(), abi::MESSAGE_SIZE);
static_assertions::const_assert_eq!(mm::PAGE_SIZE, 4096);
