// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Round-robin scheduler collaborator of the IPC engine
//! OWNERS: @kernel-sched-team
//! PUBLIC API: Scheduler (block/resume/switch/direct_switch), EnqueueOutcome, SwitchStats
//! DEPENDS_ON: task::{ThreadTable, ThreadState}
//! INVARIANTS: Bounded FIFO run queue; a thread is queued at most once; blocked threads are
//!             never queued; direct_switch bypasses the queue

use alloc::collections::VecDeque;

use crate::task::{ThreadState, ThreadTable};
use crate::types::Tid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueRejectReason {
    QueueFull { capacity: usize },
    NotRunnable,
}

#[must_use = "enqueue outcomes must be handled"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    Rejected(EnqueueRejectReason),
}

/// Counters exposed for tests and diagnostics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SwitchStats {
    pub switches: u64,
    pub direct_switches: u64,
}

pub struct Scheduler {
    run_queue: VecDeque<Tid>,
    current: Option<Tid>,
    capacity: usize,
    stats: SwitchStats,
}

impl Scheduler {
    pub fn new(capacity: usize) -> Self {
        Self {
            run_queue: VecDeque::with_capacity(capacity),
            current: None,
            capacity,
            stats: SwitchStats::default(),
        }
    }

    pub fn current(&self) -> Option<Tid> {
        self.current
    }

    pub fn queued(&self) -> usize {
        self.run_queue.len()
    }

    pub fn is_queued(&self, tid: Tid) -> bool {
        self.run_queue.contains(&tid)
    }

    pub fn stats(&self) -> SwitchStats {
        self.stats
    }

    /// Appends a runnable thread to the run queue.
    pub fn enqueue(&mut self, threads: &ThreadTable, tid: Tid) -> EnqueueOutcome {
        if threads.get(tid).map(|t| t.state) != Some(ThreadState::Runnable) {
            return EnqueueOutcome::Rejected(EnqueueRejectReason::NotRunnable);
        }
        if self.run_queue.contains(&tid) {
            return EnqueueOutcome::Enqueued;
        }
        if self.run_queue.len() >= self.capacity {
            return EnqueueOutcome::Rejected(EnqueueRejectReason::QueueFull {
                capacity: self.capacity,
            });
        }
        self.run_queue.push_back(tid);
        EnqueueOutcome::Enqueued
    }

    /// Removes all queued references to `tid` and clears it if currently running.
    pub fn purge(&mut self, tid: Tid) {
        self.run_queue.retain(|queued| *queued != tid);
        if self.current == Some(tid) {
            self.current = None;
        }
    }

    /// Marks `tid` as blocked and takes it off the processor.
    pub fn block(&mut self, threads: &mut ThreadTable, tid: Tid) {
        if let Some(thread) = threads.get_mut(tid) {
            if thread.state == ThreadState::Runnable {
                thread.state = ThreadState::Blocked;
            }
        }
        self.purge(tid);
    }

    /// Makes a blocked thread runnable. Returns true if the thread was woken.
    pub fn resume(&mut self, threads: &mut ThreadTable, tid: Tid) -> bool {
        let Some(thread) = threads.get_mut(tid) else {
            return false;
        };
        if thread.state != ThreadState::Blocked {
            return false;
        }
        thread.state = ThreadState::Runnable;
        if let EnqueueOutcome::Rejected(reason) = self.enqueue(threads, tid) {
            // Capacity matches the thread limit, so this only trips on a corrupted queue.
            log_error!(target: "sched", "resume: tid={} not queued ({:?})", tid, reason);
        }
        true
    }

    /// Picks the next runnable thread from the run queue.
    pub fn switch(&mut self, threads: &ThreadTable) -> Option<Tid> {
        while let Some(tid) = self.run_queue.pop_front() {
            if threads.get(tid).map(|t| t.state) == Some(ThreadState::Runnable) {
                self.current = Some(tid);
                self.stats.switches += 1;
                return Some(tid);
            }
        }
        self.current = None;
        None
    }

    /// Blocks `from` and runs `to` immediately, without visiting the run queue.
    pub fn direct_switch(&mut self, threads: &mut ThreadTable, from: Tid, to: Tid) {
        self.block(threads, from);
        if let Some(thread) = threads.get_mut(to) {
            thread.state = ThreadState::Runnable;
        }
        self.run_queue.retain(|queued| *queued != to);
        self.current = Some(to);
        self.stats.direct_switches += 1;
    }
}
