// Btrfs volume operations used for the hibernation swap file
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Command, Stdio};

use thiserror::Error;

use crate::helpers::{force_remove, get_fstype, run_cmd_capture, run_cmd_checked, run_cmd_output};
use crate::{debug, info};

#[derive(Error, Debug)]
pub enum VolumeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Helper error: {0}")]
    Helper(#[from] crate::helpers::HelperError),
    #[error("{0} is not on btrfs (found {1})")]
    NotBtrfs(String, String),
    #[error("Cannot create subvolume {0}: {1}")]
    Subvolume(String, String),
    #[error("Cannot allocate swap file {0}: {1}")]
    Allocation(String, String),
    #[error("Unexpected output from {0}: '{1}'")]
    BadOutput(String, String),
}

pub type Result<T> = std::result::Result<T, VolumeError>;

/// Filesystem and volume manager operations
pub trait Volumes {
    fn exists(&self, path: &Path) -> bool;
    fn is_subvolume(&self, path: &Path) -> bool;
    fn create_subvolume(&self, path: &Path) -> Result<()>;
    /// Set the no-copy-on-write attribute; only files created afterwards inherit it
    fn disable_cow(&self, path: &Path) -> Result<()>;
    /// Bytes available to unprivileged writers under `path`
    fn free_space(&self, path: &Path) -> Result<u64>;
    /// Allocate a swap-formatted file of exactly `size_bytes`
    fn make_swapfile(&self, path: &Path, size_bytes: u64) -> Result<()>;
    fn restrict_permissions(&self, path: &Path) -> Result<()>;
    /// UUID of the filesystem containing `path`
    fn filesystem_uuid(&self, path: &Path) -> Result<String>;
    /// Physical page offset of the swap file's first extent
    fn swapfile_offset(&self, path: &Path) -> Result<u64>;
}

/// Volume operations backed by btrfs-progs and util-linux
#[derive(Debug, Default)]
pub struct BtrfsVolumes;

impl BtrfsVolumes {
    /// Make sure the swap location lives on btrfs before touching anything
    pub fn check_filesystem(path: &Path) -> Result<()> {
        match get_fstype(path).as_deref() {
            Some("btrfs") => Ok(()),
            Some(other) => Err(VolumeError::NotBtrfs(
                path.display().to_string(),
                other.to_string(),
            )),
            None => Err(VolumeError::NotBtrfs(
                path.display().to_string(),
                "unknown".to_string(),
            )),
        }
    }

    /// Build the swap file by hand when `mkswapfile` is unavailable
    fn make_swapfile_manual(path: &Path, size_bytes: u64) -> Result<()> {
        let path_str = path.to_string_lossy().to_string();
        let path_str = path_str.as_str();
        info!("swapfile: falling back to manual allocation for {}", path_str);

        let size = size_bytes.to_string();
        let steps: [&[&str]; 4] = [
            &["truncate", "-s", "0", path_str],
            &["chattr", "+C", path_str],
            &["fallocate", "-l", size.as_str(), path_str],
            &["mkswap", path_str],
        ];

        for step in steps {
            if let Err(e) = run_cmd_checked(step) {
                force_remove(path, false);
                return Err(VolumeError::Allocation(path_str.to_string(), e.to_string()));
            }
        }
        Ok(())
    }
}

impl Volumes for BtrfsVolumes {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_subvolume(&self, path: &Path) -> bool {
        if !path.exists() {
            return false;
        }

        Command::new("btrfs")
            .args(["subvolume", "show"])
            .arg(path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn create_subvolume(&self, path: &Path) -> Result<()> {
        Self::check_filesystem(path)?;
        let output = run_cmd_capture(&["btrfs", "subvolume", "create", &path.to_string_lossy()])?;
        if !output.success {
            return Err(VolumeError::Subvolume(
                path.display().to_string(),
                output.stderr,
            ));
        }
        info!("swapfile: created btrfs subvolume at {}", path.display());
        Ok(())
    }

    fn disable_cow(&self, path: &Path) -> Result<()> {
        run_cmd_checked(&["chattr", "+C", &path.to_string_lossy()])?;
        debug!("swapfile: disabled copy-on-write on {}", path.display());
        Ok(())
    }

    fn free_space(&self, path: &Path) -> Result<u64> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(std::io::Error::from)?;
        Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
    }

    fn make_swapfile(&self, path: &Path, size_bytes: u64) -> Result<()> {
        let path_str = path.to_string_lossy();
        let size = format!("{}m", size_bytes / (1024 * 1024));

        let output = run_cmd_capture(&[
            "btrfs",
            "filesystem",
            "mkswapfile",
            "--size",
            &size,
            "--uuid",
            "clear",
            &path_str,
        ])?;
        if output.success {
            return Ok(());
        }

        // btrfs-progs before 6.1 reject the subcommand ("unknown token"), some
        // builds reject its options; the manual path reports genuine failures
        debug!(
            "swapfile: mkswapfile failed for {}: {}",
            path_str,
            output.text().trim()
        );
        force_remove(path, false);
        Self::make_swapfile_manual(path, size_bytes)
    }

    fn restrict_permissions(&self, path: &Path) -> Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        Ok(())
    }

    fn filesystem_uuid(&self, path: &Path) -> Result<String> {
        let uuid = run_cmd_output(&["findmnt", "-no", "UUID", "-T", &path.to_string_lossy()])?;
        parse_uuid(&uuid)
    }

    fn swapfile_offset(&self, path: &Path) -> Result<u64> {
        let output = run_cmd_output(&[
            "btrfs",
            "inspect-internal",
            "map-swapfile",
            "-r",
            &path.to_string_lossy(),
        ])?;
        parse_offset(&output)
    }
}

/// Validate `findmnt -no UUID` output
pub fn parse_uuid(output: &str) -> Result<String> {
    let uuid = output.trim();
    let well_formed = !uuid.is_empty()
        && !uuid.contains(char::is_whitespace)
        && uuid.chars().all(|c| c.is_ascii_hexdigit() || c == '-');
    if well_formed {
        Ok(uuid.to_string())
    } else {
        Err(VolumeError::BadOutput("findmnt".to_string(), uuid.to_string()))
    }
}

/// Validate `btrfs inspect-internal map-swapfile -r` output
pub fn parse_offset(output: &str) -> Result<u64> {
    output
        .trim()
        .parse::<u64>()
        .map_err(|_| VolumeError::BadOutput("map-swapfile".to_string(), output.trim().to_string()))
}
