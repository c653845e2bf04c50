// Provisioning state machine: one idempotent pass from bare host to hibernate-ready
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use crate::boot::{BootConfigurator, BootError, ImageLayer, RpmOstree};
use crate::config::Settings;
use crate::fstab::{Fstab, MountTable};
use crate::helpers::am_i_root;
use crate::inspect::SystemInspector;
use crate::lock::{LockError, RunLock};
use crate::meminfo::{HostMemoryInfo, MemInfoError, MemorySource, ProcMeminfo};
use crate::power::{PowerError, PowerPolicy, PowerPolicyConfigurator};
use crate::resume::{self, ResumeError, ResumeLocation};
use crate::selinux::{PolicyError, PolicyInstaller, PolicyToolchain, SelinuxTools};
use crate::sizing::SwapTarget;
use crate::swapfile::{SwapError, SwapProvisioner, SwapState};
use crate::volume::{BtrfsVolumes, Volumes};
use crate::warning::Warning;
use crate::{info, warn};

/// Everything the run touches on the host
pub struct Host {
    pub privileged: bool,
    pub memory: Box<dyn MemorySource>,
    pub volumes: Box<dyn Volumes>,
    pub mounts: Box<dyn MountTable>,
    pub policy: Box<dyn PolicyToolchain>,
    pub image: Box<dyn ImageLayer>,
}

impl Host {
    /// The real machine
    pub fn system(settings: &Settings) -> Self {
        Self {
            privileged: am_i_root().is_ok(),
            memory: Box::new(ProcMeminfo),
            volumes: Box::new(BtrfsVolumes),
            mounts: Box::new(Fstab::new(settings.fstab.clone())),
            policy: Box::new(SelinuxTools),
            image: Box::new(RpmOstree),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    Inspect,
    SizeSwap,
    ProvisionSwap,
    InstallPolicy,
    ResolveResumeParams,
    ConfigureBoot,
    ConfigurePowerPolicy,
    Done,
}

impl Stage {
    pub fn next(self) -> Stage {
        match self {
            Stage::Start => Stage::Inspect,
            Stage::Inspect => Stage::SizeSwap,
            Stage::SizeSwap => Stage::ProvisionSwap,
            Stage::ProvisionSwap => Stage::InstallPolicy,
            Stage::InstallPolicy => Stage::ResolveResumeParams,
            Stage::ResolveResumeParams => Stage::ConfigureBoot,
            Stage::ConfigureBoot => Stage::ConfigurePowerPolicy,
            Stage::ConfigurePowerPolicy | Stage::Done => Stage::Done,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Start => "start",
            Stage::Inspect => "inspect",
            Stage::SizeSwap => "size-swap",
            Stage::ProvisionSwap => "provision-swap",
            Stage::InstallPolicy => "install-policy",
            Stage::ResolveResumeParams => "resolve-resume-params",
            Stage::ConfigureBoot => "configure-boot",
            Stage::ConfigurePowerPolicy => "configure-power-policy",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Root privileges are required")]
    Privilege,
    #[error(transparent)]
    Locked(#[from] LockError),
    #[error("Cannot read host memory: {0}")]
    Inspect(#[from] MemInfoError),
    #[error(transparent)]
    Allocation(#[from] SwapError),
    #[error(transparent)]
    PolicyCompile(#[from] PolicyError),
    #[error(transparent)]
    Resolution(#[from] ResumeError),
    #[error(transparent)]
    Boot(#[from] BootError),
    #[error(transparent)]
    PowerPolicy(#[from] PowerError),
    #[error("Interrupted before {0}")]
    Interrupted(Stage),
    #[error("{0} reached before the stage it depends on")]
    Precondition(Stage),
}

/// A failed run: where it stopped and why
#[derive(Error, Debug)]
#[error("{stage}: {source}")]
pub struct RunError {
    pub stage: Stage,
    #[source]
    pub source: ProvisionError,
}

/// What a run found, decided and changed
#[derive(Debug, Default)]
pub struct RunReport {
    pub memory: Option<HostMemoryInfo>,
    pub target: Option<SwapTarget>,
    pub swap_state: Option<SwapState>,
    pub resume: Option<ResumeLocation>,
    pub warnings: Vec<Warning>,
    pub completed: Vec<Stage>,
}

pub struct Provisioner<'a> {
    host: &'a Host,
    settings: &'a Settings,
    report: RunReport,
    lock: Option<RunLock>,
    shutdown: &'a AtomicBool,
}

impl<'a> Provisioner<'a> {
    pub fn new(host: &'a Host, settings: &'a Settings) -> Self {
        Self {
            host,
            settings,
            report: RunReport::default(),
            lock: None,
            shutdown: &crate::SHUTDOWN,
        }
    }

    /// Watch `flag` instead of the process-wide shutdown flag
    pub fn with_shutdown(mut self, flag: &'a AtomicBool) -> Self {
        self.shutdown = flag;
        self
    }

    /// Drive every stage in order; the first failure ends the run without rollback
    pub fn run(mut self) -> Result<RunReport, RunError> {
        let mut stage = Stage::Start;
        while stage != Stage::Done {
            if self.shutdown.load(Ordering::Acquire) {
                return Err(RunError {
                    stage,
                    source: ProvisionError::Interrupted(stage),
                });
            }
            stage = self
                .step(stage)
                .map_err(|source| RunError { stage, source })?;
        }
        Ok(self.report)
    }

    /// Perform `stage` and return the one after it
    pub fn step(&mut self, stage: Stage) -> Result<Stage, ProvisionError> {
        if stage != Stage::Start && stage != Stage::Done && self.lock.is_none() {
            return Err(ProvisionError::Precondition(stage));
        }

        let warnings = match stage {
            Stage::Start => self.start()?,
            Stage::Inspect => self.inspect()?,
            Stage::SizeSwap => self.size_swap()?,
            Stage::ProvisionSwap => self.provision_swap()?,
            Stage::InstallPolicy => self.install_policy()?,
            Stage::ResolveResumeParams => self.resolve_resume()?,
            Stage::ConfigureBoot => self.configure_boot()?,
            Stage::ConfigurePowerPolicy => self.configure_power()?,
            Stage::Done => return Ok(Stage::Done),
        };

        for w in &warnings {
            warn!("{}: {}", stage, w);
        }
        self.report.warnings.extend(warnings);
        self.report.completed.push(stage);
        Ok(stage.next())
    }

    fn start(&mut self) -> Result<Vec<Warning>, ProvisionError> {
        if !self.host.privileged {
            return Err(ProvisionError::Privilege);
        }
        if self.lock.is_none() {
            self.lock = Some(RunLock::acquire(&self.settings.lock_path)?);
        }
        Ok(Vec::new())
    }

    fn inspect(&mut self) -> Result<Vec<Warning>, ProvisionError> {
        let state = SystemInspector::new(self.host, self.settings).inspect()?;
        state.log_summary();
        self.report.memory = Some(state.memory);
        Ok(Vec::new())
    }

    fn size_swap(&mut self) -> Result<Vec<Warning>, ProvisionError> {
        let memory = self
            .report
            .memory
            .ok_or(ProvisionError::Precondition(Stage::SizeSwap))?;
        let target = SwapTarget::for_memory(
            self.settings.swap_file.clone(),
            memory.total_bytes,
            self.settings.swap_headroom_gib,
            self.settings.swap_priority,
        );
        info!(
            "sizing: {} GiB for {} bytes of RAM",
            target.size_gib(),
            memory.total_bytes
        );
        self.report.target = Some(target);
        Ok(Vec::new())
    }

    fn provision_swap(&mut self) -> Result<Vec<Warning>, ProvisionError> {
        let target = self
            .report
            .target
            .as_ref()
            .ok_or(ProvisionError::Precondition(Stage::ProvisionSwap))?;
        let swap = SwapProvisioner::new(self.host.volumes.as_ref(), self.host.mounts.as_ref())
            .ensure(target)?;
        self.report.swap_state = Some(swap.state);
        Ok(swap.warnings)
    }

    fn install_policy(&mut self) -> Result<Vec<Warning>, ProvisionError> {
        if self.report.swap_state.is_none() {
            return Err(ProvisionError::Precondition(Stage::InstallPolicy));
        }
        let installer = PolicyInstaller::new(
            self.host.policy.as_ref(),
            self.settings.work_dir.clone(),
            self.settings.swap_dir.clone(),
        );
        Ok(installer.install(&self.settings.policy_module)?)
    }

    fn resolve_resume(&mut self) -> Result<Vec<Warning>, ProvisionError> {
        let target = match (&self.report.swap_state, &self.report.target) {
            (Some(_), Some(target)) => target,
            _ => return Err(ProvisionError::Precondition(Stage::ResolveResumeParams)),
        };
        // Recomputed every run: a recreated file has a new offset
        let location = resume::resolve(self.host.volumes.as_ref(), &target.path)?;
        self.report.resume = Some(location);
        Ok(Vec::new())
    }

    fn configure_boot(&mut self) -> Result<Vec<Warning>, ProvisionError> {
        let location = self
            .report
            .resume
            .as_ref()
            .ok_or(ProvisionError::Precondition(Stage::ConfigureBoot))?;
        let boot = BootConfigurator::new(
            self.host.image.as_ref(),
            self.settings.dracut_conf.clone(),
        );
        Ok(boot.apply(location)?)
    }

    fn configure_power(&mut self) -> Result<Vec<Warning>, ProvisionError> {
        let policy = PowerPolicy {
            lid_switch_action: self.settings.lid_switch_action.clone(),
            hibernate_delay: self.settings.hibernate_delay.clone(),
            hibernate_mode: self.settings.hibernate_mode.clone(),
        };
        let power = PowerPolicyConfigurator::new(
            self.settings.logind_conf.clone(),
            self.settings.sleep_conf.clone(),
            policy,
        );
        Ok(power.apply()?)
    }
}
