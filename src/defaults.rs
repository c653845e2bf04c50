// Centralised default values for all configuration keys.
// SPDX-License-Identifier: GPL-3.0-or-later
//
// Settings read keys via `config.get("key").unwrap_or(DEFAULT)`; keeping the
// defaults here avoids drift between the settings loader, the status view
// and the tests.

// ── Swap ─────────────────────────────────────────────────────────────────────

pub const SWAP_DIR: &str = "/var/swap";
pub const SWAP_FILE_NAME: &str = "swapfile";
/// Below zram (~100) so the compressed device serves normal reclaim
pub const SWAP_PRIORITY: i32 = 0;
/// Extra room for kernel and driver state not visible in live RAM usage
pub const SWAP_HEADROOM_GIB: u64 = 4;
pub const FSTAB_PATH: &str = "/etc/fstab";
pub const PROC_SWAPS: &str = "/proc/swaps";

// ── SELinux ──────────────────────────────────────────────────────────────────

pub const POLICY_MODULE: &str = "systemd_sleep_swap";
pub const SWAPFILE_SELINUX_TYPE: &str = "swapfile_t";

// ── Boot ─────────────────────────────────────────────────────────────────────

pub const DRACUT_RESUME_CONF: &str = "/etc/dracut.conf.d/resume.conf";
pub const DRACUT_RESUME_FRAGMENT: &str = "add_dracutmodules+=\" resume \"\n";

// ── Power policy ─────────────────────────────────────────────────────────────

pub const LOGIND_CONF: &str = "/etc/systemd/logind.conf";
pub const SLEEP_CONF: &str = "/etc/systemd/sleep.conf";
pub const LID_SWITCH_ACTION: &str = "suspend-then-hibernate";
pub const HIBERNATE_DELAY: &str = "1h";
pub const HIBERNATE_MODE: &str = "platform";

// ── Runtime ──────────────────────────────────────────────────────────────────

pub const WORK_DIR: &str = "/run/hibernate-setup";
pub const LOCK_PATH: &str = "/run/hibernate-setup.lock";
