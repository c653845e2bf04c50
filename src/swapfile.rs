// Hibernation swap file provisioning (btrfs only)
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::Path;

use thiserror::Error;

use crate::fstab::{Activation, MountError, MountTable};
use crate::sizing::SwapTarget;
use crate::volume::{VolumeError, Volumes};
use crate::warning::Warning;
use crate::{info, warn};

#[derive(Error, Debug)]
pub enum SwapError {
    #[error("Volume error: {0}")]
    Volume(#[from] VolumeError),
    #[error("Mount table error: {0}")]
    Mount(#[from] MountError),
    #[error("Swap file path {0} has no parent directory")]
    InvalidPath(String),
    #[error("{0} exists but is not a btrfs subvolume")]
    NotSubvolume(String),
    #[error("Not enough space in {path}: need {needed} bytes, {available} available")]
    NoSpace {
        path: String,
        needed: u64,
        available: u64,
    },
}

pub type Result<T> = std::result::Result<T, SwapError>;

/// Whether this run allocated the swap file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapState {
    Created,
    AlreadyPresent,
}

/// Everything `ensure` did, for the run report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapReport {
    pub state: SwapState,
    pub registered: bool,
    pub warnings: Vec<Warning>,
}

/// Creates, registers and activates the hibernation swap file
pub struct SwapProvisioner<'a> {
    volumes: &'a dyn Volumes,
    mounts: &'a dyn MountTable,
}

impl<'a> SwapProvisioner<'a> {
    pub fn new(volumes: &'a dyn Volumes, mounts: &'a dyn MountTable) -> Self {
        Self { volumes, mounts }
    }

    /// Make sure the swap file exists, is in the mount table and is active.
    /// An existing file is never touched, resized or recreated.
    pub fn ensure(&self, target: &SwapTarget) -> Result<SwapReport> {
        let state = if self.volumes.exists(&target.path) {
            info!(
                "swapfile: {} already present, skipping allocation",
                target.path.display()
            );
            SwapState::AlreadyPresent
        } else {
            self.allocate(target)?;
            SwapState::Created
        };

        let registered = self.register(target)?;
        let warnings = self.activate(target).into_iter().collect();

        Ok(SwapReport {
            state,
            registered,
            warnings,
        })
    }

    fn allocate(&self, target: &SwapTarget) -> Result<()> {
        let dir = target
            .path
            .parent()
            .filter(|p| *p != Path::new("/") && !p.as_os_str().is_empty())
            .ok_or_else(|| SwapError::InvalidPath(target.path.display().to_string()))?;

        if !self.volumes.is_subvolume(dir) {
            if self.volumes.exists(dir) {
                // Never delete an unknown directory to make room for a subvolume
                return Err(SwapError::NotSubvolume(dir.display().to_string()));
            }
            self.volumes.create_subvolume(dir)?;
        }

        // Must precede any write: NOCOW only applies to files created afterwards
        self.volumes.disable_cow(dir)?;

        let available = self.volumes.free_space(dir)?;
        if available < target.size_bytes {
            return Err(SwapError::NoSpace {
                path: dir.display().to_string(),
                needed: target.size_bytes,
                available,
            });
        }

        info!(
            "swapfile: allocating {} ({} GiB)",
            target.path.display(),
            target.size_gib()
        );
        self.volumes.make_swapfile(&target.path, target.size_bytes)?;
        self.volumes.restrict_permissions(&target.path)?;
        Ok(())
    }

    fn register(&self, target: &SwapTarget) -> Result<bool> {
        if self.mounts.references(&target.path)? > 0 {
            return Ok(false);
        }
        self.mounts.append_swap(&target.path, target.priority)?;
        Ok(true)
    }

    /// Best effort: the fstab entry activates on next boot regardless
    fn activate(&self, target: &SwapTarget) -> Option<Warning> {
        match self.mounts.is_active(&target.path) {
            Ok(true) => return Some(Warning::SwapAlreadyActive),
            Ok(false) => {}
            Err(e) => warn!("swapfile: cannot read active swaps: {}", e),
        }

        match self.mounts.activate(&target.path, target.priority) {
            Ok(Activation::Activated) => {
                info!(
                    "swapfile: activated {} at priority {}",
                    target.path.display(),
                    target.priority
                );
                None
            }
            Ok(Activation::AlreadyActive) => Some(Warning::SwapAlreadyActive),
            Err(e) => Some(Warning::SwapActivationFailed(e.to_string())),
        }
    }
}
