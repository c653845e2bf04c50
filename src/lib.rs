// hibernate-setup - Hibernation provisioning for btrfs + rpm-ostree hosts
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod boot;
pub mod config;
pub mod defaults;
pub mod fstab;
pub mod helpers;
pub mod inspect;
pub mod lock;
pub mod meminfo;
pub mod power;
pub mod provision;
pub mod resume;
pub mod selinux;
pub mod sizing;
pub mod swapfile;
pub mod volume;
pub mod warning;

#[cfg(test)]
mod testing;

use std::sync::atomic::{AtomicBool, Ordering};

/// Global shutdown flag for signal handling
pub static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Request shutdown
pub fn request_shutdown() {
    SHUTDOWN.store(true, Ordering::Release);
}
