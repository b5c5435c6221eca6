// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Syscall handlers exposed to the dispatcher
//! OWNERS: @kernel-team
//! PUBLIC API: install_handlers(table), Context, sys_ipc_fastpath
//! DEPENDS_ON: kernel::Kernel (channel lifecycle and IPC engine)
//! INVARIANTS: Stable syscall IDs; Decode→Check→Execute pattern; handles decode to Cid

use synapse_abi::{syscall as nr, IpcFlags};

use super::{Args, Error, SyscallTable, SysResult};
use crate::ipc::{IpcError, IpcOutcome};
use crate::kernel::Kernel;
use crate::types::{Cid, Tid};

// Typed decoders for seL4-style Decode→Check→Execute

fn decode_cid(reg: usize) -> Result<Cid, Error> {
    Cid::decode(reg).ok_or(Error::Ipc(IpcError::InvalidCid))
}

#[derive(Copy, Clone)]
struct HandleArgsTyped {
    cid: Cid,
}

impl HandleArgsTyped {
    #[inline]
    fn decode(args: &Args) -> Result<Self, Error> {
        Ok(Self { cid: decode_cid(args.get(0))? })
    }
}

#[derive(Copy, Clone)]
struct PairArgsTyped {
    first: Cid,
    second: Cid,
}

impl PairArgsTyped {
    #[inline]
    fn decode(args: &Args) -> Result<Self, Error> {
        Ok(Self { first: decode_cid(args.get(0))?, second: decode_cid(args.get(1))? })
    }
}

#[derive(Copy, Clone)]
struct NotifyArgsTyped {
    cid: Cid,
    bits: u64,
}

impl NotifyArgsTyped {
    #[inline]
    fn decode(args: &Args) -> Result<Self, Error> {
        Ok(Self { cid: decode_cid(args.get(0))?, bits: args.get(1) as u64 })
    }
}

#[derive(Copy, Clone)]
struct IpcArgsTyped {
    cid: Cid,
    flags: IpcFlags,
}

impl IpcArgsTyped {
    #[inline]
    fn decode(args: &Args) -> Result<Self, Error> {
        Ok(Self { cid: decode_cid(args.get(0))?, flags: nr::ipc_flags(args.word()?) })
    }

    #[inline]
    fn check(&self) -> Result<(), Error> {
        // NOBLOCK alone has nothing to act on.
        if !self.flags.intersects(IpcFlags::SEND | IpcFlags::RECV) {
            return Err(Error::Ipc(IpcError::InvalidArg));
        }
        Ok(())
    }
}

/// Execution context of one syscall.
pub struct Context<'a> {
    pub kernel: &'a mut Kernel,
    pub caller: Tid,
}

impl<'a> Context<'a> {
    pub fn new(kernel: &'a mut Kernel, caller: Tid) -> Self {
        Self { kernel, caller }
    }
}

/// Registers the default set of syscall handlers.
pub fn install_handlers(table: &mut SyscallTable) {
    table.register(nr::IPC as usize, sys_ipc);
    table.register(nr::OPEN as usize, sys_open);
    table.register(nr::CLOSE as usize, sys_close);
    table.register(nr::LINK as usize, sys_link);
    table.register(nr::TRANSFER as usize, sys_transfer);
    table.register(nr::NOTIFY as usize, sys_notify);
    table.register(nr::NOP as usize, sys_nop);
}

fn outcome(result: Result<IpcOutcome, IpcError>) -> SysResult<usize> {
    match result? {
        IpcOutcome::Complete => Ok(0),
        IpcOutcome::Blocked => Err(Error::Reschedule),
        IpcOutcome::Terminated => Err(Error::ThreadExit),
    }
}

fn sys_ipc(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let typed = IpcArgsTyped::decode(args)?;
    typed.check()?;
    outcome(ctx.kernel.ipc(ctx.caller, typed.cid, typed.flags))
}

/// Entry for the exact word `IPC | SEND | RECV`, checked before table dispatch.
pub fn sys_ipc_fastpath(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let typed = HandleArgsTyped::decode(args)?;
    outcome(ctx.kernel.ipc_fastpath(ctx.caller, typed.cid))
}

fn sys_open(ctx: &mut Context<'_>, _args: &Args) -> SysResult<usize> {
    let cid = ctx.kernel.open(ctx.caller)?;
    Ok(cid.as_raw() as usize)
}

fn sys_close(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let typed = HandleArgsTyped::decode(args)?;
    ctx.kernel.close(ctx.caller, typed.cid)?;
    Ok(0)
}

fn sys_link(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let typed = PairArgsTyped::decode(args)?;
    ctx.kernel.link(ctx.caller, typed.first, typed.second)?;
    Ok(0)
}

fn sys_transfer(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let typed = PairArgsTyped::decode(args)?;
    ctx.kernel.transfer(ctx.caller, typed.first, typed.second)?;
    Ok(0)
}

fn sys_notify(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let typed = NotifyArgsTyped::decode(args)?;
    ctx.kernel.notify(ctx.caller, typed.cid, typed.bits)?;
    Ok(0)
}

fn sys_nop(_ctx: &mut Context<'_>, _args: &Args) -> SysResult<usize> {
    Ok(1)
}
