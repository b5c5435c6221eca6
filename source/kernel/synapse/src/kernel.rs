// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel state owner: tables, scheduler, suspension and resumption of IPC operations
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! PUBLIC API: Kernel (process/thread lifecycle, syscall entry, schedule/settle), SharedKernel
//! DEPENDS_ON: ipc, task, sched, cap, mm, syscall
//! INVARIANTS: A suspended operation pins the channel its continuation names; a destructed
//!             channel is reclaimed (slot freed, handle released) only once unpinned;
//!             a thread issues a call only while Runnable without a pending continuation
//!
//! The kernel is a state machine driven from the trap path. A call that must wait records a
//! [`Continuation`] on the thread and blocks it; when the scheduler later picks the thread,
//! [`Kernel::schedule`] resumes the operation and writes the final value into the thread's
//! return register (read with [`Kernel::take_return`]).

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::{Mutex, MutexGuard};
use synapse_abi::{syscall as abi_syscall, Errno, MsgHeader};

use crate::{
    config::KernelConfig,
    ipc::{ChannelArena, Channel, Continuation, IpcError, IpcOutcome, Notifier},
    mm::FrameAllocator,
    sched::{EnqueueOutcome, Scheduler},
    syscall::{self, api, Args, SyscallTable},
    task::{BufferKind, Process, ProcessTable, Thread, ThreadInfo, ThreadState, ThreadTable},
    types::{ChannelId, Cid, Pid, Tid},
};

pub struct Kernel {
    config: KernelConfig,
    pub(crate) channels: ChannelArena,
    pub(crate) processes: ProcessTable,
    pub(crate) threads: ThreadTable,
    pub(crate) scheduler: Scheduler,
    pub(crate) frames: FrameAllocator,
    syscalls: SyscallTable,
    /// Raised by [`Notifier`]s; cleared by the scheduling pass that consumes it.
    notified: Arc<AtomicBool>,
}

impl Kernel {
    /// Creates a kernel whose process table already holds the kernel process (PID 0).
    pub fn new(config: KernelConfig) -> Self {
        let mut processes =
            ProcessTable::new(config.max_processes.max(1), config.channels_per_process);
        let kernel_pid = processes.create();
        debug_assert_eq!(kernel_pid, Ok(Pid::KERNEL));
        let mut syscalls = SyscallTable::new();
        api::install_handlers(&mut syscalls);
        Self {
            config,
            channels: ChannelArena::new(config.max_channels),
            processes,
            threads: ThreadTable::new(config.max_threads),
            scheduler: Scheduler::new(config.max_threads),
            frames: FrameAllocator::new(config.frame_pool),
            syscalls,
            notified: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn frames(&self) -> &FrameAllocator {
        &self.frames
    }

    pub fn create_process(&mut self) -> Result<Pid, IpcError> {
        let pid = self.processes.create()?;
        log_debug!(target: "task", "process created pid={}", pid);
        Ok(pid)
    }

    pub fn process(&self, pid: Pid) -> Option<&Process> {
        self.processes.get(pid)
    }

    pub fn process_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.processes.get_mut(pid)
    }

    /// Creates a runnable thread in `pid` and queues it.
    pub fn spawn_thread(&mut self, pid: Pid) -> Result<Tid, IpcError> {
        if self.processes.get(pid).is_none() {
            return Err(IpcError::InvalidArg);
        }
        let tid = self.threads.spawn(pid)?;
        if let Some(process) = self.processes.get_mut(pid) {
            process.threads.push(tid);
        }
        if let EnqueueOutcome::Rejected(reason) = self.scheduler.enqueue(&self.threads, tid) {
            log_warn!(target: "sched", "spawn: tid={} not queued ({:?})", tid, reason);
        }
        Ok(tid)
    }

    pub fn thread(&self, tid: Tid) -> Option<&Thread> {
        self.threads.get(tid)
    }

    /// Mutable thread access for the trap path (buffer writes, page window updates).
    pub fn thread_mut(&mut self, tid: Tid) -> Option<&mut Thread> {
        self.threads.get_mut(tid)
    }

    /// Sets the window in which `tid` accepts page payloads.
    pub fn set_page_window(&mut self, tid: Tid, info: ThreadInfo) -> Result<(), IpcError> {
        self.threads.get_mut(tid).ok_or(IpcError::InvalidArg)?.info = info;
        Ok(())
    }

    /// Resolves `cid` in the registry of `pid`.
    pub fn channel(&self, pid: Pid, cid: Cid) -> Option<&Channel> {
        let id = self.processes.get(pid)?.channels.get(cid).ok()?;
        self.channels.get(id)
    }

    pub fn channel_by_id(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(id)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Lock-free notifier for the destination `cid` currently routes notifications to.
    pub fn notifier(&self, pid: Pid, cid: Cid) -> Result<Notifier, IpcError> {
        let ch = self.lookup(pid, cid)?;
        let dst = self.send_target(ch)?;
        let target = self.channel_ref(dst)?.notification.clone();
        Ok(Notifier::new(target, self.notified.clone()))
    }

    /// Reads (and clears) the value a completed call left for `tid`.
    pub fn take_return(&mut self, tid: Tid) -> Option<isize> {
        self.threads.get_mut(tid)?.take_return()
    }

    /// Syscall entry from the trap path.
    ///
    /// Returns the value for the caller's return register, or `None` when the caller was
    /// suspended (the value then arrives through [`Kernel::take_return`]) or terminated.
    pub fn syscall(&mut self, caller: Tid, args: &Args) -> Option<isize> {
        if let Err(err) = self.caller(caller) {
            return Some(err.as_return());
        }
        let Ok(word) = args.word() else {
            return Some(Errno::InvalidSyscall.as_return());
        };
        let table = self.syscalls;
        let mut ctx = api::Context::new(self, caller);
        let result = if word == abi_syscall::FASTPATH_WORD {
            api::sys_ipc_fastpath(&mut ctx, args)
        } else {
            table.dispatch(abi_syscall::syscall_type(word) as usize, &mut ctx, args)
        };
        match result {
            Ok(value) => Some(isize::try_from(value).unwrap_or(isize::MAX)),
            Err(syscall::Error::Ipc(err)) => Some(err.as_return()),
            Err(syscall::Error::InvalidSyscall) => Some(Errno::InvalidSyscall.as_return()),
            Err(syscall::Error::Reschedule) | Err(syscall::Error::ThreadExit) => None,
        }
    }

    /// Picks the next runnable thread and resumes its suspended operation, if any.
    pub fn schedule(&mut self) -> Option<Tid> {
        self.poll_notifications();
        let next = self.scheduler.switch(&self.threads)?;
        self.drive(next);
        Some(next)
    }

    /// Runs the scheduler until the run queue is empty; returns the number of switches.
    pub fn settle(&mut self) -> usize {
        let mut switches = 0;
        while self.schedule().is_some() {
            switches += 1;
        }
        switches
    }

    /// Wakes receivers of channels whose notification word gained bits through a [`Notifier`].
    pub fn poll_notifications(&mut self) {
        if !self.notified.swap(false, Ordering::AcqRel) {
            return;
        }
        for index in 0..self.channels.slot_count() {
            if let Some(id) = self.channels.id_at(index) {
                self.wake_notified(id);
            }
        }
    }

    /// Terminates `tid`, detaching it from every wait queue and receiver slot.
    pub fn exit_thread(&mut self, tid: Tid) {
        let Some(thread) = self.threads.get_mut(tid) else {
            return;
        };
        if thread.state == ThreadState::Exited {
            return;
        }
        thread.state = ThreadState::Exited;
        thread.abort_reason = None;
        let pid = thread.pid();
        let blocked_on = thread.blocked_on.take();
        let pending = thread.pending.take();
        let handoff = thread.handoff.take();
        self.scheduler.purge(tid);
        if let Some(ch) = blocked_on.and_then(|id| self.channels.get_mut(id)) {
            ch.wait_queue.retain(|queued| *queued != tid);
            if ch.receiver == Some(tid) {
                ch.receiver = None;
            }
        }
        if let Some(cont) = pending {
            self.release(cont);
        }
        if let Some(process) = self.processes.get_mut(pid) {
            process.threads.retain(|t| *t != tid);
        }
        if let Some(recv_ch) = handoff {
            self.pass_receiver(recv_ch);
        }
        log_debug!(target: "task", "thread exited tid={}", tid);
    }

    /// Tears down a user process: its threads exit, its channels are destroyed.
    pub fn destroy_process(&mut self, pid: Pid) -> Result<(), IpcError> {
        if pid == Pid::KERNEL {
            return Err(IpcError::InvalidArg);
        }
        let process = self.processes.get(pid).ok_or(IpcError::InvalidArg)?;
        let threads = process.threads.clone();
        let channels: Vec<ChannelId> = process.channels.iter().map(|(_, id)| id).collect();
        for tid in threads {
            self.exit_thread(tid);
        }
        for id in channels {
            // Channels closed earlier but still pinned are already destructed.
            let _ = self.destroy_channel(id);
        }
        self.processes.remove(pid);
        log_debug!(target: "task", "process destroyed pid={}", pid);
        Ok(())
    }

    // ---------------------------------------------------------------------------------------
    // Internal helpers shared by the IPC engine.

    /// Returns the process of a thread that may issue a call now.
    pub(crate) fn caller(&self, tid: Tid) -> Result<Pid, IpcError> {
        let thread = self.threads.get(tid).ok_or(IpcError::InvalidArg)?;
        if thread.state != ThreadState::Runnable || thread.pending.is_some() {
            return Err(IpcError::InvalidArg);
        }
        Ok(thread.pid())
    }

    pub(crate) fn lookup(&self, pid: Pid, cid: Cid) -> Result<ChannelId, IpcError> {
        let process = self.processes.get(pid).ok_or(IpcError::InvalidCid)?;
        Ok(process.channels.get(cid)?)
    }

    pub(crate) fn channel_ref(&self, id: ChannelId) -> Result<&Channel, IpcError> {
        self.channels.get(id).ok_or(IpcError::ChannelClosed)
    }

    pub(crate) fn channel_mut(&mut self, id: ChannelId) -> Result<&mut Channel, IpcError> {
        self.channels.get_mut(id).ok_or(IpcError::ChannelClosed)
    }

    pub(crate) fn thread_ref(&self, tid: Tid) -> Result<&Thread, IpcError> {
        self.threads.get(tid).ok_or(IpcError::InvalidArg)
    }

    pub(crate) fn thread_entry(&mut self, tid: Tid) -> Result<&mut Thread, IpcError> {
        self.threads.get_mut(tid).ok_or(IpcError::InvalidArg)
    }

    /// Records `cont` on `tid` and pins its channel without touching the scheduler.
    pub(crate) fn suspend(&mut self, tid: Tid, cont: Continuation) {
        if let Some(ch) = self.channels.get_mut(cont.channel()) {
            ch.pins += 1;
        }
        if let Some(thread) = self.threads.get_mut(tid) {
            thread.pending = Some(cont);
        }
    }

    /// Suspends `tid` until another party resumes it.
    pub(crate) fn park(&mut self, tid: Tid, cont: Continuation) {
        self.suspend(tid, cont);
        self.scheduler.block(&mut self.threads, tid);
    }

    /// Clears `blocked_on` and makes `tid` runnable.
    pub(crate) fn wake(&mut self, tid: Tid) {
        if let Some(thread) = self.threads.get_mut(tid) {
            thread.blocked_on = None;
        }
        self.scheduler.resume(&mut self.threads, tid);
    }

    /// Injects `reason` into a suspended thread and wakes it to observe the error.
    pub(crate) fn abort(&mut self, tid: Tid, reason: IpcError) {
        let Some(thread) = self.threads.get_mut(tid) else {
            return;
        };
        if thread.state == ThreadState::Exited {
            return;
        }
        thread.abort_reason = Some(reason);
        log_warn!(target: "ipc", "abort tid={} reason={:?}", tid, reason);
        self.wake(tid);
    }

    /// Drops the pin `cont` held and reclaims its channel once nothing refers to it.
    pub(crate) fn release(&mut self, cont: Continuation) {
        let id = cont.channel();
        let Some(ch) = self.channels.get_mut(id) else {
            return;
        };
        ch.pins = ch.pins.saturating_sub(1);
        if ch.destructed && ch.pins == 0 {
            self.reclaim(id);
        }
    }

    /// Resumes the suspended operation of `tid` and completes it unless it suspends again.
    pub(crate) fn drive(&mut self, tid: Tid) {
        let Some(cont) = self.threads.get_mut(tid).and_then(|t| t.pending.take()) else {
            return;
        };
        let result = match cont {
            Continuation::Send { channel, flags } => self.resume_send(tid, channel, flags),
            Continuation::Recv { channel, .. } => self.resume_recv(tid, channel),
        };
        self.release(cont);
        self.complete(tid, result);
    }

    /// Writes the result of a finished operation into the thread's return register.
    pub(crate) fn complete(&mut self, tid: Tid, result: Result<IpcOutcome, IpcError>) {
        let ret = match result {
            Ok(IpcOutcome::Blocked) | Ok(IpcOutcome::Terminated) => return,
            Ok(IpcOutcome::Complete) => 0,
            Err(err) => err.as_return(),
        };
        let Some(thread) = self.threads.get_mut(tid) else {
            return;
        };
        if thread.state == ThreadState::Exited {
            return;
        }
        if core::mem::take(&mut thread.in_kernel_ipc) {
            thread.active = BufferKind::User;
        }
        thread.set_return(ret);
    }

    /// Writes a notification message into the waiting receiver of `id` and wakes it.
    pub(crate) fn wake_notified(&mut self, id: ChannelId) {
        let Some(ch) = self.channels.get_mut(id) else {
            return;
        };
        if ch.destructed || ch.notification.peek() == 0 {
            return;
        }
        let Some(receiver) = ch.receiver.take() else {
            return;
        };
        let bits = ch.notification.take();
        if let Some(thread) = self.threads.get_mut(receiver) {
            let msg = thread.message_mut();
            msg.header = MsgHeader::NOTIFICATION;
            msg.from = 0;
            msg.notification = bits;
        }
        log_trace!(target: "ipc", "notify wake tid={} bits={:#x}", receiver, bits);
        self.wake(receiver);
    }
}

/// The kernel behind the global IPC lock.
///
/// Every operation runs under one `spin::Mutex`; notification words are shared `Arc`s, so
/// [`Notifier`]s taken from here raise bits without the lock.
pub struct SharedKernel {
    inner: Mutex<Kernel>,
}

static_assertions::assert_impl_all!(SharedKernel: Send, Sync);
static_assertions::assert_impl_all!(Notifier: Send, Sync);

impl SharedKernel {
    pub fn new(kernel: Kernel) -> Self {
        Self { inner: Mutex::new(kernel) }
    }

    pub fn lock(&self) -> MutexGuard<'_, Kernel> {
        self.inner.lock()
    }

    pub fn syscall(&self, caller: Tid, args: &Args) -> Option<isize> {
        self.inner.lock().syscall(caller, args)
    }

    pub fn notifier(&self, pid: Pid, cid: Cid) -> Result<Notifier, IpcError> {
        self.inner.lock().notifier(pid, cid)
    }

    pub fn into_inner(self) -> Kernel {
        self.inner.into_inner()
    }
}
