// Helper utilities for hibernate-setup
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use libsystemd::logging::{connected_to_journal, journal_print, Priority};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HelperError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Command failed: {0}")]
    CommandFailed(String),
    #[error("Not running as root")]
    NotRoot,
}

pub type Result<T> = std::result::Result<T, HelperError>;

pub const GIB: u64 = 1024 * 1024 * 1024;

/// Check if running as root
pub fn am_i_root() -> Result<()> {
    if nix::unistd::geteuid().is_root() {
        Ok(())
    } else {
        Err(HelperError::NotRoot)
    }
}

/// Read a file, treating a missing file as empty
pub fn read_file_or_empty<P: AsRef<Path>>(path: P) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}

/// Write string to file and sync it to disk.
/// Missing parent directories are created.
pub fn write_file<P: AsRef<Path>>(path: P, content: &str) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        makedirs(parent)?;
    }
    let mut file = fs::File::create(path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

/// Write file only when its content differs. Returns true if written.
pub fn write_file_if_changed<P: AsRef<Path>>(path: P, content: &str) -> Result<bool> {
    let path = path.as_ref();
    if read_file_or_empty(path)? == content && path.exists() {
        return Ok(false);
    }
    write_file(path, content)?;
    Ok(true)
}

/// Force remove file, ignoring errors
pub fn force_remove<P: AsRef<Path>>(path: P, verbose: bool) {
    let path = path.as_ref();
    match fs::remove_file(path) {
        Ok(()) => {
            if verbose {
                crate::info!("Removed {}", path.display());
            }
        }
        Err(e) => {
            if verbose {
                crate::warn!("Cannot remove {}: {}", path.display(), e);
            }
        }
    }
}

/// Create directories recursively
pub fn makedirs<P: AsRef<Path>>(path: P) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

/// Captured result of an external command
#[derive(Debug, Clone)]
pub struct CmdOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    /// Combined stdout + stderr, for matching tool messages
    pub fn text(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Run a command and capture stdout
pub fn run_cmd_output(cmd: &[&str]) -> Result<String> {
    let output = run_cmd_capture(cmd)?;
    if output.success {
        Ok(output.stdout)
    } else {
        Err(HelperError::CommandFailed(format!(
            "{}: {}",
            cmd.join(" "),
            output.stderr
        )))
    }
}

/// Run a command and capture stdout, stderr and the exit status.
/// Only a failure to spawn is an error; a non-zero exit is reported in the result.
pub fn run_cmd_capture(cmd: &[&str]) -> Result<CmdOutput> {
    crate::debug!("exec: {}", cmd.join(" "));
    let output = Command::new(cmd[0])
        .args(&cmd[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()?;

    Ok(CmdOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

/// Run a command, mapping a non-zero exit to CommandFailed
pub fn run_cmd_checked(cmd: &[&str]) -> Result<()> {
    run_cmd_output(cmd).map(|_| ())
}

/// Get the filesystem type of a given path
pub fn get_fstype<P: AsRef<Path>>(path: P) -> Option<String> {
    let path = path.as_ref();
    // Walk up to the closest existing ancestor
    let check_path = path
        .ancestors()
        .find(|p| p.exists())
        .unwrap_or(Path::new("/"));

    let output = Command::new("findmnt")
        .args(["-n", "-o", "FSTYPE", "--target", &check_path.to_string_lossy()])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .ok()?;

    let fstype = String::from_utf8_lossy(&output.stdout).trim().to_lowercase();
    if fstype.is_empty() {
        None
    } else {
        Some(fstype)
    }
}

/// Severity of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

fn journal_attached() -> bool {
    static ATTACHED: OnceLock<bool> = OnceLock::new();
    *ATTACHED.get_or_init(connected_to_journal)
}

/// Emit one log line. Goes to the journal with a matching priority when
/// stderr is a journal stream, otherwise to stdout/stderr with a prefix.
#[doc(hidden)]
pub fn log_line(level: Level, msg: &str) {
    if journal_attached() {
        let priority = match level {
            Level::Debug => Priority::Debug,
            Level::Info => Priority::Info,
            Level::Warn => Priority::Warning,
            Level::Error => Priority::Error,
        };
        if journal_print(priority, msg).is_ok() {
            return;
        }
    }

    match level {
        Level::Info => println!("INFO: {}", msg),
        Level::Warn => eprintln!("WARN: {}", msg),
        Level::Error => eprintln!("ERRO: {}", msg),
        Level::Debug => eprintln!("DEBUG: {}", msg),
    }
}

// Logging macros
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::helpers::log_line($crate::helpers::Level::Info, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::helpers::log_line($crate::helpers::Level::Warn, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::helpers::log_line($crate::helpers::Level::Error, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        if std::env::var("DEBUG").is_ok() {
            $crate::helpers::log_line($crate::helpers::Level::Debug, &format!($($arg)*))
        }
    };
}
