// Persistent swap registration (/etc/fstab) and activation
// SPDX-License-Identifier: GPL-3.0-or-later

use std::ffi::CString;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::defaults;
use crate::helpers::{makedirs, read_file_or_empty};
use crate::info;

#[derive(Error, Debug)]
pub enum MountError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Helper error: {0}")]
    Helper(#[from] crate::helpers::HelperError),
    #[error("swapon {0} failed: {1}")]
    Activate(String, io::Error),
}

pub type Result<T> = std::result::Result<T, MountError>;

// From <sys/swap.h>
const SWAP_FLAG_PREFER: libc::c_int = 0x8000;
const SWAP_FLAG_PRIO_MASK: libc::c_int = 0x7fff;

/// Outcome of an activation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Activated,
    AlreadyActive,
}

/// Line-based mount table plus the live swap list
pub trait MountTable {
    /// Number of entries whose device field is `path`
    fn references(&self, path: &Path) -> Result<usize>;
    fn append_swap(&self, path: &Path, priority: i32) -> Result<()>;
    fn is_active(&self, path: &Path) -> Result<bool>;
    fn activate(&self, path: &Path, priority: i32) -> Result<Activation>;
}

/// fstab entry for a swap file at the given priority
pub fn swap_entry(path: &Path, priority: i32) -> String {
    format!(
        "{} none swap defaults,pri={} 0 0",
        escape_field(&path.to_string_lossy()),
        priority
    )
}

/// fstab and /proc/swaps encode blanks as octal escapes
fn escape_field(field: &str) -> String {
    field
        .replace('\\', "\\134")
        .replace(' ', "\\040")
        .replace('\t', "\\011")
}

fn unescape_field(field: &str) -> String {
    field
        .replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\134", "\\")
}

/// First-column values of every non-comment line
pub fn device_fields(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_whitespace().next())
        .map(unescape_field)
        .collect()
}

/// Count of entries whose device field is `path`
pub fn count_references(content: &str, path: &Path) -> usize {
    let wanted = path.to_string_lossy();
    device_fields(content)
        .iter()
        .filter(|field| field.as_str() == wanted)
        .count()
}

/// /etc/fstab backed mount table
#[derive(Debug, Clone)]
pub struct Fstab {
    pub path: PathBuf,
    pub proc_swaps: PathBuf,
}

impl Fstab {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            proc_swaps: PathBuf::from(defaults::PROC_SWAPS),
        }
    }
}

impl MountTable for Fstab {
    fn references(&self, path: &Path) -> Result<usize> {
        let content = read_file_or_empty(&self.path)?;
        Ok(count_references(&content, path))
    }

    /// Append-only: existing lines are never rewritten
    fn append_swap(&self, path: &Path, priority: i32) -> Result<()> {
        let existing = read_file_or_empty(&self.path)?;
        let mut line = String::new();
        if !existing.is_empty() && !existing.ends_with('\n') {
            line.push('\n');
        }
        line.push_str(&swap_entry(path, priority));
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            makedirs(parent)?;
        }
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.sync_all()?;
        info!("fstab: registered {} at priority {}", path.display(), priority);
        Ok(())
    }

    fn is_active(&self, path: &Path) -> Result<bool> {
        // /proc/swaps starts with a header line, which never matches a path
        let content = read_file_or_empty(&self.proc_swaps)?;
        Ok(count_references(&content, path) > 0)
    }

    fn activate(&self, path: &Path, priority: i32) -> Result<Activation> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| MountError::Io(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
        let flags = SWAP_FLAG_PREFER | (priority.max(0) & SWAP_FLAG_PRIO_MASK);

        // SAFETY: c_path is a valid NUL-terminated string for the call duration
        let ret = unsafe { libc::swapon(c_path.as_ptr(), flags) };
        if ret == 0 {
            return Ok(Activation::Activated);
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EBUSY) {
            Ok(Activation::AlreadyActive)
        } else {
            Err(MountError::Activate(path.display().to_string(), err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FSTAB: &str = "\
# /etc/fstab
UUID=3f1c7a9e /     btrfs subvol=root,compress=zstd:1 0 0
UUID=3f1c7a9e /var  btrfs subvol=var,compress=zstd:1 0 0
#/var/swap/swapfile none swap defaults 0 0
";

    #[test]
    fn test_swap_entry_format() {
        assert_eq!(
            swap_entry(Path::new("/var/swap/swapfile"), 0),
            "/var/swap/swapfile none swap defaults,pri=0 0 0"
        );
        assert_eq!(
            swap_entry(Path::new("/var/my swap/file"), 0),
            "/var/my\\040swap/file none swap defaults,pri=0 0 0"
        );
    }

    #[test]
    fn test_commented_entry_does_not_count() {
        assert_eq!(count_references(FSTAB, Path::new("/var/swap/swapfile")), 0);
    }

    #[test]
    fn test_prefix_path_does_not_count() {
        let content = "/var/swap/swapfile2 none swap defaults 0 0\n";
        assert_eq!(count_references(content, Path::new("/var/swap/swapfile")), 0);
    }

    #[test]
    fn test_proc_swaps_format() {
        let swaps = "Filename\t\t\t\tType\t\tSize\t\tUsed\t\tPriority\n\
                     /dev/zram0                              partition\t8388604\t\t0\t\t100\n\
                     /var/swap/swapfile                      file\t\t20971516\t0\t\t0\n";
        assert_eq!(count_references(swaps, Path::new("/var/swap/swapfile")), 1);
        assert_eq!(count_references(swaps, Path::new("/dev/zram0")), 1);
    }

    #[test]
    fn test_append_once() {
        let dir = tempfile::tempdir().unwrap();
        let fstab_path = dir.path().join("fstab");
        std::fs::write(&fstab_path, FSTAB.trim_end()).unwrap();

        let table = Fstab::new(fstab_path.clone());
        let swap = Path::new("/var/swap/swapfile");
        assert_eq!(table.references(swap).unwrap(), 0);

        table.append_swap(swap, 0).unwrap();
        assert_eq!(table.references(swap).unwrap(), 1);

        let content = std::fs::read_to_string(&fstab_path).unwrap();
        assert_eq!(count_references(&content, swap), 1);
        assert!(content.ends_with("/var/swap/swapfile none swap defaults,pri=0 0 0\n"));
        // previous last line was not glued to the new entry
        assert!(content.contains("defaults 0 0\n/var/swap/swapfile none swap"));
    }

    #[test]
    fn test_append_keeps_existing_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let fstab_path = dir.path().join("fstab");
        std::fs::write(&fstab_path, FSTAB).unwrap();

        let table = Fstab::new(fstab_path.clone());
        table.append_swap(Path::new("/var/swap/swapfile"), 0).unwrap();

        let content = std::fs::read_to_string(&fstab_path).unwrap();
        assert_eq!(
            content,
            format!("{}/var/swap/swapfile none swap defaults,pri=0 0 0\n", FSTAB)
        );
    }

    #[test]
    fn test_append_creates_missing_fstab() {
        let dir = tempfile::tempdir().unwrap();
        let fstab_path = dir.path().join("etc/fstab");
        let table = Fstab::new(fstab_path.clone());
        table.append_swap(Path::new("/var/swap/swapfile"), 0).unwrap();
        assert_eq!(
            std::fs::read_to_string(&fstab_path).unwrap(),
            "/var/swap/swapfile none swap defaults,pri=0 0 0\n"
        );
    }

    #[test]
    fn test_missing_fstab_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let table = Fstab::new(dir.path().join("absent"));
        assert_eq!(table.references(Path::new("/var/swap/swapfile")).unwrap(), 0);
    }
}
