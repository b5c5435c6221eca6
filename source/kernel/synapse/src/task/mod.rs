// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Process and thread tables (IPC-relevant state only)
//! OWNERS: @kernel-sched-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! PUBLIC API: Process, ProcessTable, Thread, ThreadTable, ThreadState, ThreadInfo, BufferKind
//! DEPENDS_ON: cap::ChannelTable, mm::{PageTable, VmArea}, ipc::{Continuation, IpcError}
//! INVARIANTS: A thread has at most one blocked_on and one pending continuation;
//!             abort_reason is consumed exactly once; the table never holds more than `limit`
//!             slots and an exited slot is reused only under a new generation

use alloc::vec::Vec;

use synapse_abi::Message;

use crate::{
    cap::ChannelTable,
    ipc::{Continuation, IpcError},
    mm::{MapError, PageTable, VmArea},
    types::{ChannelId, Pid, Tid, VirtAddr},
};

/// Scheduling state of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Runnable,
    Blocked,
    Exited,
}

/// Which message buffer IPC operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// The buffer shared with user space.
    User,
    /// Kernel-private buffer used by `kernel_ipc`.
    Kernel,
}

/// Per-thread page payload window.
///
/// A page payload is accepted only if `num_pages` covers it and `page_base` is a valid user
/// page address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadInfo {
    pub page_base: VirtAddr,
    pub num_pages: usize,
}

impl Default for ThreadInfo {
    fn default() -> Self {
        Self { page_base: VirtAddr::new(0), num_pages: 0 }
    }
}

pub struct Thread {
    tid: Tid,
    pid: Pid,
    pub(crate) state: ThreadState,
    user_buffer: Message,
    kernel_buffer: Message,
    pub(crate) active: BufferKind,
    pub(crate) info: ThreadInfo,
    pub(crate) blocked_on: Option<ChannelId>,
    pub(crate) abort_reason: Option<IpcError>,
    pub(crate) pending: Option<Continuation>,
    /// Receiver slot this sender was woken to fill; handed on if the sender does not use it.
    pub(crate) handoff: Option<ChannelId>,
    /// The pending operation was started through `kernel_ipc`.
    pub(crate) in_kernel_ipc: bool,
    ret: Option<isize>,
}

impl Thread {
    fn new(tid: Tid, pid: Pid) -> Self {
        Self {
            tid,
            pid,
            state: ThreadState::Runnable,
            user_buffer: Message::zeroed(),
            kernel_buffer: Message::zeroed(),
            active: BufferKind::User,
            info: ThreadInfo::default(),
            blocked_on: None,
            abort_reason: None,
            pending: None,
            handoff: None,
            in_kernel_ipc: false,
            ret: None,
        }
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub fn is_blocked(&self) -> bool {
        self.state == ThreadState::Blocked
    }

    pub fn blocked_on(&self) -> Option<ChannelId> {
        self.blocked_on
    }

    pub fn info(&self) -> ThreadInfo {
        self.info
    }

    pub fn active_buffer(&self) -> BufferKind {
        self.active
    }

    /// Returns true while a suspended IPC operation waits to be resumed.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn buffer(&self, kind: BufferKind) -> &Message {
        match kind {
            BufferKind::User => &self.user_buffer,
            BufferKind::Kernel => &self.kernel_buffer,
        }
    }

    pub fn buffer_mut(&mut self, kind: BufferKind) -> &mut Message {
        match kind {
            BufferKind::User => &mut self.user_buffer,
            BufferKind::Kernel => &mut self.kernel_buffer,
        }
    }

    /// The buffer IPC currently reads from and writes to.
    pub fn message(&self) -> &Message {
        self.buffer(self.active)
    }

    pub fn message_mut(&mut self) -> &mut Message {
        self.buffer_mut(self.active)
    }

    pub(crate) fn uses_kernel_buffer(&self) -> bool {
        self.active == BufferKind::Kernel
    }

    /// Consumes an injected error.
    pub(crate) fn take_abort(&mut self) -> Option<IpcError> {
        self.abort_reason.take()
    }

    pub(crate) fn set_return(&mut self, value: isize) {
        self.ret = Some(value);
    }

    pub(crate) fn take_return(&mut self) -> Option<isize> {
        self.ret.take()
    }
}

/// All threads, indexed by [`Tid`]. At most `limit` slots are ever allocated.
pub struct ThreadTable {
    threads: Vec<Thread>,
    limit: usize,
}

impl ThreadTable {
    pub fn new(limit: usize) -> Self {
        Self { threads: Vec::new(), limit: limit.min(u32::MAX as usize) }
    }

    /// Creates a runnable thread, recycling the slot of an exited thread first.
    pub fn spawn(&mut self, pid: Pid) -> Result<Tid, IpcError> {
        if let Some(slot) = self.threads.iter_mut().find(|t| t.state == ThreadState::Exited) {
            let old = slot.tid;
            let tid = Tid::new(old.as_index() as u32, old.generation().wrapping_add(1));
            *slot = Thread::new(tid, pid);
            return Ok(tid);
        }
        if self.threads.len() >= self.limit {
            return Err(IpcError::OutOfResource);
        }
        let tid = Tid::new(self.threads.len() as u32, 0);
        self.threads.push(Thread::new(tid, pid));
        Ok(tid)
    }

    pub fn get(&self, tid: Tid) -> Option<&Thread> {
        self.threads.get(tid.as_index()).filter(|t| t.tid == tid)
    }

    pub fn get_mut(&mut self, tid: Tid) -> Option<&mut Thread> {
        self.threads.get_mut(tid.as_index()).filter(|t| t.tid == tid)
    }

    /// Number of allocated slots, live or exited.
    pub fn slots(&self) -> usize {
        self.threads.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Thread> {
        self.threads.iter()
    }
}

pub struct Process {
    pid: Pid,
    pub(crate) channels: ChannelTable,
    pub(crate) page_table: PageTable,
    pub(crate) vm_areas: Vec<VmArea>,
    pub(crate) threads: Vec<Tid>,
}

impl Process {
    fn new(pid: Pid, channel_slots: usize) -> Self {
        Self {
            pid,
            channels: ChannelTable::with_capacity(channel_slots),
            page_table: PageTable::new(),
            vm_areas: Vec::new(),
            threads: Vec::new(),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn is_kernel(&self) -> bool {
        self.pid == Pid::KERNEL
    }

    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    pub fn page_table_mut(&mut self) -> &mut PageTable {
        &mut self.page_table
    }

    pub fn vm_areas(&self) -> &[VmArea] {
        &self.vm_areas
    }

    pub fn threads(&self) -> &[Tid] {
        &self.threads
    }

    /// Registers a demand-paged area. Areas must not overlap.
    pub fn add_vm_area(&mut self, area: VmArea) -> Result<(), MapError> {
        area.validate()?;
        if self.vm_areas.iter().any(|existing| existing.overlaps(&area)) {
            return Err(MapError::Overlap);
        }
        self.vm_areas.push(area);
        Ok(())
    }
}

/// All processes, indexed by [`Pid`]. Slot 0 is the kernel process.
pub struct ProcessTable {
    processes: Vec<Option<Process>>,
    limit: usize,
    channel_slots: usize,
}

impl ProcessTable {
    pub fn new(limit: usize, channel_slots: usize) -> Self {
        Self { processes: Vec::new(), limit, channel_slots }
    }

    pub fn create(&mut self) -> Result<Pid, IpcError> {
        let live = self.processes.iter().filter(|p| p.is_some()).count();
        if live >= self.limit || self.processes.len() >= u32::MAX as usize {
            return Err(IpcError::OutOfResource);
        }
        let pid = Pid::from_raw(self.processes.len() as u32);
        self.processes.push(Some(Process::new(pid, self.channel_slots)));
        Ok(pid)
    }

    pub fn get(&self, pid: Pid) -> Option<&Process> {
        self.processes.get(pid.as_index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.processes.get_mut(pid.as_index()).and_then(Option::as_mut)
    }

    pub fn remove(&mut self, pid: Pid) -> Option<Process> {
        self.processes.get_mut(pid.as_index()).and_then(Option::take)
    }
}
