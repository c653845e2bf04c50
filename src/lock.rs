// Exclusive run lock so two provisioning runs never interleave
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fs::{File, OpenOptions};
use std::path::Path;

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use thiserror::Error;

use crate::debug;
use crate::helpers::makedirs;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Helper error: {0}")]
    Helper(#[from] crate::helpers::HelperError),
    #[error("Another run holds {0}")]
    Busy(String),
    #[error("Cannot lock {0}: {1}")]
    Flock(String, Errno),
}

pub type Result<T> = std::result::Result<T, LockError>;

/// Advisory flock(2) held until dropped
pub struct RunLock {
    _lock: Flock<File>,
}

impl RunLock {
    /// Take the lock without waiting
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            makedirs(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => {
                debug!("lock: holding {}", path.display());
                Ok(Self { _lock: lock })
            }
            Err((_, Errno::EWOULDBLOCK)) => Err(LockError::Busy(path.display().to_string())),
            Err((_, errno)) => Err(LockError::Flock(path.display().to_string(), errno)),
        }
    }
}
