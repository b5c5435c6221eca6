// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Syscall dispatcher and error handling
//! OWNERS: @kernel-team
//! PUBLIC API: SyscallTable, Args, Error, Handler, SysResult
//! DEPENDS_ON: ipc, syscall::api
//! INVARIANTS: Fixed MAX_SYSCALL window; stable IDs (synapse_abi::syscall); decode/check/execute

pub mod api;

use core::fmt;

use synapse_abi::IpcFlags;

use crate::ipc;

/// Size of the dispatch table.
const MAX_SYSCALL: usize = 16;

/// Result type used by syscall handlers.
pub type SysResult<T> = Result<T, Error>;

/// Syscall arguments: a0, a1 and the syscall word.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Args {
    regs: [usize; 3],
}

impl Args {
    /// Creates a new argument pack from the provided registers.
    pub const fn new(regs: [usize; 3]) -> Self {
        Self { regs }
    }

    /// Builds the arguments of a call of type `ty` with IPC `flags`.
    pub const fn call(ty: u32, flags: IpcFlags, a0: usize, a1: usize) -> Self {
        Self::new([a0, a1, synapse_abi::syscall::word(ty, flags) as usize])
    }

    /// Returns the raw register at `index` (0 or 1).
    pub fn get(&self, index: usize) -> usize {
        self.regs[index]
    }

    /// Syscall word: type in the low byte, IPC flags above. Bits past 32 are rejected.
    pub fn word(&self) -> Result<u32, Error> {
        u32::try_from(self.regs[2]).map_err(|_| Error::InvalidSyscall)
    }
}

/// Error returned by the dispatcher and handler stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Syscall type not present in the dispatch table.
    InvalidSyscall,
    /// IPC operation failed.
    Ipc(ipc::IpcError),
    /// The caller was suspended; the result is written when the operation completes.
    Reschedule,
    /// The caller was terminated and must not resume.
    ThreadExit,
}

impl From<ipc::IpcError> for Error {
    fn from(value: ipc::IpcError) -> Self {
        Self::Ipc(value)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Type alias for a syscall handler.
pub type Handler = fn(&mut api::Context<'_>, &Args) -> SysResult<usize>;

/// Dispatch table storing handlers by syscall type.
#[derive(Clone, Copy)]
pub struct SyscallTable {
    handlers: [Option<Handler>; MAX_SYSCALL],
}

impl SyscallTable {
    /// Creates an empty dispatch table.
    pub const fn new() -> Self {
        const NONE: Option<Handler> = None;
        Self { handlers: [NONE; MAX_SYSCALL] }
    }

    /// Registers a handler.
    pub fn register(&mut self, number: usize, handler: Handler) {
        if number < MAX_SYSCALL {
            self.handlers[number] = Some(handler);
        }
    }

    /// Executes the handler referenced by `number`.
    #[must_use]
    pub fn dispatch(
        &self,
        number: usize,
        ctx: &mut api::Context<'_>,
        args: &Args,
    ) -> SysResult<usize> {
        self.handlers
            .get(number)
            .and_then(|entry| *entry)
            .ok_or(Error::InvalidSyscall)
            .and_then(|handler| handler(ctx, args))
    }
}

impl Default for SyscallTable {
    fn default() -> Self {
        Self::new()
    }
}
