// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Static kernel configuration (resource limits, fast path, frame pool)
//! OWNERS: @kernel-team
//! PUBLIC API: KernelConfig, FramePool
//! INVARIANTS: All limits are fixed at boot; values are plain data (const-constructible)

use crate::types::PhysAddr;

/// Physical memory handed to the demand pager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePool {
    pub base: PhysAddr,
    pub frames: usize,
}

/// Boot-time kernel limits and switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Size of the global channel arena.
    pub max_channels: usize,
    /// Handle slots per process registry.
    pub channels_per_process: usize,
    /// Processes including the kernel process.
    pub max_processes: usize,
    pub max_threads: usize,
    /// Take the IPC fast path when its preconditions hold.
    pub fastpath: bool,
    pub frame_pool: FramePool,
}

impl KernelConfig {
    pub const DEFAULT: Self = Self {
        max_channels: 1024,
        channels_per_process: 64,
        max_processes: 64,
        max_threads: 256,
        fastpath: true,
        frame_pool: FramePool { base: PhysAddr::new(0x8800_0000), frames: 4096 },
    };

    pub const fn with_fastpath(mut self, enabled: bool) -> Self {
        self.fastpath = enabled;
        self
    }

    pub const fn with_max_channels(mut self, max: usize) -> Self {
        self.max_channels = max;
        self
    }

    pub const fn with_channels_per_process(mut self, slots: usize) -> Self {
        self.channels_per_process = slots;
        self
    }

    pub const fn with_frame_pool(mut self, base: PhysAddr, frames: usize) -> Self {
        self.frame_pool = FramePool { base, frames };
        self
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
