// Kernel arguments and initramfs through rpm-ostree
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::PathBuf;

use thiserror::Error;

use crate::defaults;
use crate::helpers::{run_cmd_capture, run_cmd_output, write_file_if_changed};
use crate::resume::ResumeLocation;
use crate::warning::Warning;
use crate::info;

#[derive(Error, Debug)]
pub enum BootError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Helper error: {0}")]
    Helper(#[from] crate::helpers::HelperError),
    #[error("rpm-ostree {0} failed: {1}")]
    RpmOstree(String, String),
}

pub type Result<T> = std::result::Result<T, BootError>;

/// One change to the persistent kernel argument set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KargEdit {
    /// Append unless an identical argument exists
    Append(String),
    /// Remove one occurrence of exactly this argument
    Delete(String),
}

/// Outcome of an initramfs enable request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitramfsRequest {
    Queued,
    AlreadyEnabled,
}

/// Immutable-OS image layer: kernel arguments and initramfs regeneration
pub trait ImageLayer {
    fn kernel_args(&self) -> Result<Vec<String>>;
    fn edit_kernel_args(&self, edits: &[KargEdit]) -> Result<()>;
    fn enable_initramfs(&self) -> Result<InitramfsRequest>;
    fn initramfs_enabled(&self) -> Result<bool>;
}

/// Image layer backed by the rpm-ostree CLI
#[derive(Debug, Default)]
pub struct RpmOstree;

impl ImageLayer for RpmOstree {
    fn kernel_args(&self) -> Result<Vec<String>> {
        let output = run_cmd_output(&["rpm-ostree", "kargs"])?;
        Ok(output.split_whitespace().map(str::to_string).collect())
    }

    fn edit_kernel_args(&self, edits: &[KargEdit]) -> Result<()> {
        let flags: Vec<String> = edits
            .iter()
            .map(|edit| match edit {
                KargEdit::Append(arg) => format!("--append-if-missing={}", arg),
                KargEdit::Delete(arg) => format!("--delete={}", arg),
            })
            .collect();

        let mut cmd = vec!["rpm-ostree", "kargs"];
        cmd.extend(flags.iter().map(String::as_str));

        let output = run_cmd_capture(&cmd)?;
        if !output.success {
            return Err(BootError::RpmOstree("kargs".to_string(), output.stderr));
        }
        Ok(())
    }

    fn enable_initramfs(&self) -> Result<InitramfsRequest> {
        let output = run_cmd_capture(&["rpm-ostree", "initramfs", "--enable"])?;
        if output.success {
            return Ok(InitramfsRequest::Queued);
        }
        if output.text().to_lowercase().contains("already enabled") {
            return Ok(InitramfsRequest::AlreadyEnabled);
        }
        Err(BootError::RpmOstree("initramfs".to_string(), output.stderr))
    }

    fn initramfs_enabled(&self) -> Result<bool> {
        let output = run_cmd_output(&["rpm-ostree", "initramfs"])?;
        Ok(parse_initramfs_status(&output))
    }
}

/// `rpm-ostree initramfs` prints "Initramfs regeneration: enabled|disabled"
pub fn parse_initramfs_status(output: &str) -> bool {
    output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .any(|(label, value)| label.trim() == "Initramfs regeneration" && value.trim() == "enabled")
}

/// Key part of `key=value` (or the whole flag)
pub fn karg_key(arg: &str) -> &str {
    arg.split_once('=').map(|(k, _)| k).unwrap_or(arg)
}

/// Edits plus the conditions worth reporting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KargPlan {
    pub edits: Vec<KargEdit>,
    pub warnings: Vec<Warning>,
}

/// Ordered kernel argument list as persisted by the image layer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootArgumentSet {
    args: Vec<String>,
}

impl BootArgumentSet {
    pub fn new(args: Vec<String>) -> Self {
        Self { args }
    }

    pub fn parse(line: &str) -> Self {
        Self::new(line.split_whitespace().map(str::to_string).collect())
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn values<'s>(&'s self, key: &'s str) -> impl Iterator<Item = &'s String> + 's {
        self.args.iter().filter(move |arg| karg_key(arg) == key)
    }

    pub fn count(&self, key: &str) -> usize {
        self.values(key).count()
    }

    /// Edits that leave exactly one entry per desired key, holding the desired value
    pub fn plan(&self, desired: &[String]) -> KargPlan {
        let mut plan = KargPlan::default();

        for want in desired {
            let key = karg_key(want);
            let mut kept = false;
            let mut stale = Vec::new();

            for arg in self.values(key) {
                if arg == want && !kept {
                    kept = true;
                } else {
                    stale.push(arg.clone());
                }
            }

            for arg in &stale {
                plan.edits.push(KargEdit::Delete(arg.clone()));
            }

            if kept {
                plan.warnings.push(Warning::BootArgumentPresent(want.clone()));
            } else {
                for old in stale.iter().filter(|old| *old != want) {
                    plan.warnings.push(Warning::BootArgumentReplaced {
                        old: old.clone(),
                        new: want.clone(),
                    });
                }
                plan.edits.push(KargEdit::Append(want.clone()));
            }
        }

        plan
    }

    /// Apply edits with the image layer's semantics
    pub fn apply(&mut self, edits: &[KargEdit]) {
        for edit in edits {
            match edit {
                KargEdit::Append(arg) => {
                    if !self.args.contains(arg) {
                        self.args.push(arg.clone());
                    }
                }
                KargEdit::Delete(arg) => {
                    if let Some(pos) = self.args.iter().position(|a| a == arg) {
                        self.args.remove(pos);
                    }
                }
            }
        }
    }
}

/// Persists resume parameters and the initramfs resume module
pub struct BootConfigurator<'a> {
    image: &'a dyn ImageLayer,
    dracut_conf: PathBuf,
}

impl<'a> BootConfigurator<'a> {
    pub fn new(image: &'a dyn ImageLayer, dracut_conf: PathBuf) -> Self {
        Self { image, dracut_conf }
    }

    pub fn apply(&self, location: &ResumeLocation) -> Result<Vec<Warning>> {
        let current = BootArgumentSet::new(self.image.kernel_args()?);
        let plan = current.plan(&location.kernel_args());
        let mut warnings = plan.warnings;

        if !plan.edits.is_empty() {
            self.image.edit_kernel_args(&plan.edits)?;
            info!("boot: kernel arguments updated ({} edit(s))", plan.edits.len());
        }

        if write_file_if_changed(&self.dracut_conf, defaults::DRACUT_RESUME_FRAGMENT)? {
            info!("boot: wrote {}", self.dracut_conf.display());
        }

        match self.image.enable_initramfs()? {
            InitramfsRequest::Queued => info!("boot: initramfs regeneration enabled"),
            InitramfsRequest::AlreadyEnabled => warnings.push(Warning::InitramfsAlreadyEnabled),
        }

        Ok(warnings)
    }
}
