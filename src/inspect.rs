// Read-only snapshot of everything a provisioning run would touch
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fmt::Display;

use crate::boot::BootArgumentSet;
use crate::config::Settings;
use crate::defaults;
use crate::helpers::read_file_or_empty;
use crate::meminfo::{HostMemoryInfo, Result};
use crate::power::{active_settings, HIBERNATE_DELAY_KEY, HIBERNATE_MODE_KEY, LID_SWITCH_KEYS};
use crate::provision::Host;
use crate::{debug, info};

/// Host state as found; `None` where a probe could not answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostState {
    pub memory: HostMemoryInfo,
    pub swap_file_present: bool,
    pub fstab_references: Option<usize>,
    pub swap_active: Option<bool>,
    pub policy_installed: Option<bool>,
    pub kernel_args: Option<BootArgumentSet>,
    pub initramfs_enabled: Option<bool>,
    pub dracut_configured: bool,
    pub logind_conf: String,
    pub sleep_conf: String,
}

/// Last active value of `key`, the one systemd uses
fn effective<'c>(content: &'c str, key: &str) -> Option<&'c str> {
    active_settings(content, &[key])
        .last()
        .map(|(_, value)| *value)
}

impl HostState {
    /// What a `setup` run would still have to do, one line per item
    pub fn pending(&self, settings: &Settings) -> Vec<String> {
        let mut todo = Vec::new();
        let swap = settings.swap_file.display();

        if !self.swap_file_present {
            todo.push(format!("create {}", swap));
        }
        if self.fstab_references == Some(0) {
            todo.push(format!("add {} to {}", swap, settings.fstab.display()));
        }
        if self.swap_active == Some(false) {
            todo.push(format!("activate {}", swap));
        }
        if self.policy_installed == Some(false) {
            todo.push(format!("install SELinux module {}", settings.policy_module));
        }
        if let Some(args) = &self.kernel_args {
            for key in ["resume", "resume_offset"] {
                if args.count(key) != 1 {
                    todo.push(format!("set kernel argument {}", key));
                }
            }
        }
        if !self.dracut_configured {
            todo.push(format!("write {}", settings.dracut_conf.display()));
        }
        if self.initramfs_enabled == Some(false) {
            todo.push("enable initramfs regeneration".to_string());
        }

        for key in LID_SWITCH_KEYS {
            if effective(&self.logind_conf, key) != Some(settings.lid_switch_action.as_str()) {
                todo.push(format!("set {}={}", key, settings.lid_switch_action));
            }
        }
        let sleep = [
            (HIBERNATE_DELAY_KEY, settings.hibernate_delay.as_str()),
            (HIBERNATE_MODE_KEY, settings.hibernate_mode.as_str()),
        ];
        for (key, value) in sleep {
            if effective(&self.sleep_conf, key) != Some(value) {
                todo.push(format!("set {}={}", key, value));
            }
        }

        todo
    }

    pub fn log_summary(&self) {
        info!(
            "inspect: {} bytes RAM, swap file {}, {} fstab entr{}",
            self.memory.total_bytes,
            if self.swap_file_present { "present" } else { "absent" },
            self.fstab_references
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".to_string()),
            if self.fstab_references == Some(1) { "y" } else { "ies" }
        );
        if let Some(args) = &self.kernel_args {
            debug!("inspect: kernel args: {}", args.args().join(" "));
        }
    }
}

/// Probes the host through its capabilities without changing anything
pub struct SystemInspector<'a> {
    host: &'a Host,
    settings: &'a Settings,
}

fn probe<T, E: Display>(what: &str, result: std::result::Result<T, E>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("inspect: cannot read {}: {}", what, e);
            None
        }
    }
}

impl<'a> SystemInspector<'a> {
    pub fn new(host: &'a Host, settings: &'a Settings) -> Self {
        Self { host, settings }
    }

    /// Only the memory reading is required; the rest is best effort
    pub fn inspect(&self) -> Result<HostState> {
        let memory = self.host.memory.memory_info()?;
        let swap = &self.settings.swap_file;

        let policy_installed = probe("policy modules", self.host.policy.installed_modules())
            .map(|modules| modules.contains(&self.settings.policy_module));
        let dracut_configured = read_file_or_empty(&self.settings.dracut_conf)
            .map(|content| content == defaults::DRACUT_RESUME_FRAGMENT)
            .unwrap_or(false);

        Ok(HostState {
            memory,
            swap_file_present: self.host.volumes.exists(swap),
            fstab_references: probe("mount table", self.host.mounts.references(swap)),
            swap_active: probe("active swaps", self.host.mounts.is_active(swap)),
            policy_installed,
            kernel_args: probe("kernel arguments", self.host.image.kernel_args())
                .map(BootArgumentSet::new),
            initramfs_enabled: probe("initramfs status", self.host.image.initramfs_enabled()),
            dracut_configured,
            logind_conf: read_file_or_empty(&self.settings.logind_conf).unwrap_or_default(),
            sleep_conf: read_file_or_empty(&self.settings.sleep_conf).unwrap_or_default(),
        })
    }
}
