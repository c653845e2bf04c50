// Memory information parser for /proc/meminfo
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fs::File;
use std::io::{BufRead, BufReader};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemInfoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Missing field: {0}")]
    MissingField(String),
    #[error("Parse error: {0}")]
    ParseError(String),
}

pub type Result<T> = std::result::Result<T, MemInfoError>;

/// Snapshot of the host's memory, taken once per run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostMemoryInfo {
    pub total_bytes: u64,
}

/// Source of the host memory snapshot
pub trait MemorySource {
    fn memory_info(&self) -> Result<HostMemoryInfo>;
}

/// Reads `MemTotal` from /proc/meminfo
#[derive(Debug, Default)]
pub struct ProcMeminfo;

impl MemorySource for ProcMeminfo {
    fn memory_info(&self) -> Result<HostMemoryInfo> {
        Ok(HostMemoryInfo {
            total_bytes: get_ram_size()?,
        })
    }
}

/// Parse the `MemTotal:   N kB` line from any meminfo-formatted reader.
/// Stops at the first match.
pub fn parse_mem_total<R: BufRead>(reader: R) -> Result<u64> {
    for line in reader.lines() {
        let line = line?;
        let Some(value_part) = line.strip_prefix("MemTotal:") else {
            continue;
        };
        let parts: Vec<&str> = value_part.split_whitespace().collect();
        let value = parts
            .first()
            .ok_or_else(|| MemInfoError::ParseError(line.clone()))?
            .parse::<u64>()
            .map_err(|e| MemInfoError::ParseError(e.to_string()))?;

        return Ok(match parts.get(1) {
            Some(&"kB") => value * 1024,
            _ => value,
        });
    }
    Err(MemInfoError::MissingField("MemTotal".to_string()))
}

/// Get total RAM in bytes
pub fn get_ram_size() -> Result<u64> {
    let file = File::open("/proc/meminfo")?;
    parse_mem_total(BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "MemTotal:       16123456 kB\n\
                          MemFree:         1234567 kB\n\
                          HugePages_Total:       0\n\
                          SwapTotal:       8388604 kB\n";

    #[test]
    fn test_parse_mem_total() {
        assert_eq!(parse_mem_total(SAMPLE.as_bytes()).unwrap(), 16123456 * 1024);
    }

    #[test]
    fn test_mem_total_not_first_line() {
        let content = "MemFree:   1 kB\nMemTotal:  2048 kB\n";
        assert_eq!(parse_mem_total(content.as_bytes()).unwrap(), 2 * 1024 * 1024);
    }

    #[test]
    fn test_missing_mem_total() {
        let err = parse_mem_total("MemFree: 1 kB\n".as_bytes()).unwrap_err();
        assert!(matches!(err, MemInfoError::MissingField(f) if f == "MemTotal"));
    }

    #[test]
    fn test_garbled_mem_total() {
        let err = parse_mem_total("MemTotal: lots kB\n".as_bytes()).unwrap_err();
        assert!(matches!(err, MemInfoError::ParseError(_)));
    }

    #[test]
    fn test_get_ram_size() {
        let size = get_ram_size().unwrap();
        assert!(size > 0);
    }
}
