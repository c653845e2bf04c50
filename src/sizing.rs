// Swap size calculation for hibernation
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::PathBuf;

use crate::helpers::GIB;

/// Target swap size in whole GiB: RAM rounded up to the next GiB, plus headroom.
pub fn target_swap_gib(total_bytes: u64, headroom_gib: u64) -> u64 {
    total_bytes.div_ceil(GIB) + headroom_gib
}

/// The swap file a run wants to exist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapTarget {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub priority: i32,
}

impl SwapTarget {
    pub fn for_memory(path: PathBuf, total_bytes: u64, headroom_gib: u64, priority: i32) -> Self {
        Self {
            path,
            size_bytes: target_swap_gib(total_bytes, headroom_gib) * GIB,
            priority,
        }
    }

    pub fn size_gib(&self) -> u64 {
        self.size_bytes / GIB
    }
}
