// Resume-from-hibernation parameters for a swap file inside btrfs
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::Path;

use thiserror::Error;

use crate::info;
use crate::volume::{VolumeError, Volumes};

#[derive(Error, Debug)]
pub enum ResumeError {
    #[error("Cannot determine filesystem UUID of {0}: {1}")]
    Uuid(String, VolumeError),
    #[error("Cannot determine physical offset of {0}: {1}")]
    Offset(String, VolumeError),
}

pub type Result<T> = std::result::Result<T, ResumeError>;

/// Where the kernel finds the hibernation image on resume.
/// Only valid for the swap file it was computed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeLocation {
    pub filesystem_uuid: String,
    pub physical_offset: u64,
}

impl ResumeLocation {
    /// `resume=UUID=...` and `resume_offset=...`
    pub fn kernel_args(&self) -> [String; 2] {
        [
            format!("resume=UUID={}", self.filesystem_uuid),
            format!("resume_offset={}", self.physical_offset),
        ]
    }
}

/// Resolve the resume location of `swap_file`. The UUID is the one of the
/// filesystem holding the file, not of any partition.
pub fn resolve(volumes: &dyn Volumes, swap_file: &Path) -> Result<ResumeLocation> {
    let name = swap_file.display().to_string();
    let filesystem_uuid = volumes
        .filesystem_uuid(swap_file)
        .map_err(|e| ResumeError::Uuid(name.clone(), e))?;
    let physical_offset = volumes
        .swapfile_offset(swap_file)
        .map_err(|e| ResumeError::Offset(name, e))?;

    info!(
        "resume: UUID={} offset={}",
        filesystem_uuid, physical_offset
    );
    Ok(ResumeLocation {
        filesystem_uuid,
        physical_offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeVolumes, FAKE_UUID};

    #[test]
    fn test_kernel_args() {
        let location = ResumeLocation {
            filesystem_uuid: "abcd-1234".to_string(),
            physical_offset: 533760,
        };
        assert_eq!(
            location.kernel_args(),
            ["resume=UUID=abcd-1234".to_string(), "resume_offset=533760".to_string()]
        );
    }

    #[test]
    fn test_resolve() {
        let volumes = FakeVolumes::default();
        volumes.add_swapfile("/var/swap/swapfile");
        let location = resolve(&volumes, Path::new("/var/swap/swapfile")).unwrap();
        assert_eq!(location.filesystem_uuid, FAKE_UUID);
        assert!(location.physical_offset > 0);
    }

    #[test]
    fn test_missing_file_fails() {
        let volumes = FakeVolumes::default();
        let err = resolve(&volumes, Path::new("/var/swap/swapfile")).unwrap_err();
        assert!(matches!(err, ResumeError::Offset(..)));
    }

    #[test]
    fn test_unmounted_fails_on_uuid() {
        let volumes = FakeVolumes::default();
        volumes.add_swapfile("/var/swap/swapfile");
        volumes.fail_uuid();
        let err = resolve(&volumes, Path::new("/var/swap/swapfile")).unwrap_err();
        assert!(matches!(err, ResumeError::Uuid(..)));
    }
}
