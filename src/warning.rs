// Non-fatal conditions tolerated during a run
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fmt;

/// A best-effort condition: logged, never changes the exit status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    SwapAlreadyActive,
    SwapActivationFailed(String),
    FileContextRegistered(String),
    BootArgumentPresent(String),
    BootArgumentReplaced { old: String, new: String },
    InitramfsAlreadyEnabled,
    /// A drop-in sets a key we manage, and drop-ins win over the main file
    DropInOverride { file: String, key: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::SwapAlreadyActive => write!(f, "swap file is already active"),
            Warning::SwapActivationFailed(e) => {
                write!(f, "could not activate swap now ({}), it will be on next boot", e)
            }
            Warning::FileContextRegistered(spec) => {
                write!(f, "file context for {} is already registered", spec)
            }
            Warning::BootArgumentPresent(arg) => write!(f, "kernel argument {} already present", arg),
            Warning::BootArgumentReplaced { old, new } => {
                write!(f, "kernel argument {} replaced by {}", old, new)
            }
            Warning::InitramfsAlreadyEnabled => {
                write!(f, "initramfs regeneration is already enabled")
            }
            Warning::DropInOverride { file, key } => {
                write!(f, "{} overrides {}; remove it there for the new value to apply", file, key)
            }
        }
    }
}
