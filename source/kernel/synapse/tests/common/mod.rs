// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use synapse::abi::{syscall as nr, IpcFlags, Message};
use synapse::{Args, Cid, Kernel, KernelConfig, Pid, Tid};

/// Two processes P and Q with one thread each; P's `a` is linked with Q's `b`.
///
/// Q opens a spare channel first so that `a` and `b` have different handle values.
pub struct Pair {
    pub kernel: Kernel,
    pub p_pid: Pid,
    pub q_pid: Pid,
    pub p: Tid,
    pub q: Tid,
    pub a: Cid,
    pub b: Cid,
}

impl Pair {
    pub fn new() -> Self {
        Self::with_config(KernelConfig::DEFAULT)
    }

    pub fn with_config(config: KernelConfig) -> Self {
        let mut kernel = Kernel::new(config);
        let p_pid = kernel.create_process().unwrap();
        let q_pid = kernel.create_process().unwrap();
        let p = kernel.spawn_thread(p_pid).unwrap();
        let q = kernel.spawn_thread(q_pid).unwrap();
        let a = kernel.open(p).unwrap();
        kernel.open(q).unwrap();
        let b = kernel.open(q).unwrap();
        kernel.connect((p_pid, a), (q_pid, b)).unwrap();
        Self { kernel, p_pid, q_pid, p, q, a, b }
    }

    pub fn put(&mut self, tid: Tid, msg: Message) {
        *self.kernel.thread_mut(tid).unwrap().message_mut() = msg;
    }

    pub fn msg(&self, tid: Tid) -> Message {
        *self.kernel.thread(tid).unwrap().message()
    }

    pub fn call(&mut self, tid: Tid, cid: Cid, flags: IpcFlags) -> Option<isize> {
        self.kernel.syscall(tid, &ipc(cid, flags))
    }
}

pub fn ipc(cid: Cid, flags: IpcFlags) -> Args {
    Args::call(nr::IPC, flags, cid.as_raw() as usize, 0)
}

pub fn send() -> IpcFlags {
    IpcFlags::SEND
}

pub fn recv() -> IpcFlags {
    IpcFlags::RECV
}

pub fn call() -> IpcFlags {
    IpcFlags::SEND | IpcFlags::RECV
}
