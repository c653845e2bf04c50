// Lid switch and hibernate delay policy (logind.conf / sleep.conf)
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::helpers::{read_file_or_empty, write_file_if_changed};
use crate::warning::Warning;
use crate::{debug, info};

#[derive(Error, Debug)]
pub enum PowerError {
    #[error("Helper error: {0}")]
    Helper(#[from] crate::helpers::HelperError),
}

pub type Result<T> = std::result::Result<T, PowerError>;

pub const LOGIND_SECTION: &str = "Login";
pub const SLEEP_SECTION: &str = "Sleep";
pub const LID_SWITCH_KEYS: [&str; 2] = ["HandleLidSwitch", "HandleLidSwitchExternalPower"];
pub const HIBERNATE_DELAY_KEY: &str = "HibernateDelaySec";
pub const HIBERNATE_MODE_KEY: &str = "HibernateMode";

/// Classify a line as `key=value`, possibly commented out with `#` or `;`.
/// Returns the key, the value and whether the line is commented.
fn parse_key_line(line: &str) -> Option<(&str, &str, bool)> {
    let trimmed = line.trim();
    let uncommented = trimmed.trim_start_matches(['#', ';']).trim_start();
    let commented = uncommented.len() != trimmed.len();
    let (key, value) = uncommented.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key, value.trim(), commented))
}

fn is_section_header(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('[') && trimmed.ends_with(']')
}

/// Line range of the first `[section]` body, header excluded
fn section_bounds(lines: &[String], section: &str) -> Option<(usize, usize)> {
    let header = format!("[{}]", section);
    let start = lines.iter().position(|l| l.trim() == header)?;
    let end = lines[start + 1..]
        .iter()
        .position(|l| is_section_header(l))
        .map(|i| start + 1 + i)
        .unwrap_or(lines.len());
    Some((start, end))
}

/// Set `key=value` for every pair inside `[section]`.
///
/// An active line for the key is replaced, otherwise the first commented one;
/// a key seen nowhere is added at the end of the section. Later active
/// duplicates are dropped. A missing section is appended once.
pub fn upsert_section(content: &str, section: &str, pairs: &[(&str, &str)]) -> String {
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();

    if section_bounds(&lines, section).is_none() {
        let mut out = content.to_string();
        if !out.is_empty() {
            if !out.ends_with('\n') {
                out.push('\n');
            }
            out.push('\n');
        }
        out.push_str(&format!("[{}]\n", section));
        for (key, value) in pairs {
            out.push_str(&format!("{}={}\n", key, value));
        }
        return out;
    }

    for (key, value) in pairs {
        let Some((start, end)) = section_bounds(&lines, section) else {
            continue;
        };
        let body = start + 1..end;

        let mut active = Vec::new();
        let mut commented = Vec::new();
        for i in body.clone() {
            if let Some((k, _, is_commented)) = parse_key_line(&lines[i]) {
                if k == *key {
                    if is_commented {
                        commented.push(i);
                    } else {
                        active.push(i);
                    }
                }
            }
        }

        let new_line = format!("{}={}", key, value);
        match active.first().or(commented.first()) {
            Some(&target) => {
                lines[target] = new_line;
                for &dup in active.iter().skip(1).rev() {
                    lines.remove(dup);
                }
            }
            None => {
                let insert_at = body
                    .rev()
                    .find(|&i| !lines[i].trim().is_empty())
                    .map(|i| i + 1)
                    .unwrap_or(start + 1);
                lines.insert(insert_at, new_line);
            }
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Active `key=value` lines for any of `keys`, regardless of section
pub fn active_settings<'c>(content: &'c str, keys: &[&str]) -> Vec<(&'c str, &'c str)> {
    content
        .lines()
        .filter_map(parse_key_line)
        .filter(|(key, _, commented)| !commented && keys.contains(key))
        .map(|(key, value, _)| (key, value))
        .collect()
}

/// Drop-in directories systemd consults for a config file; they win over it
pub fn dropin_dirs(conf: &Path) -> Vec<PathBuf> {
    let Some(name) = conf.file_name() else {
        return Vec::new();
    };
    let dropin_name = format!("{}.d", name.to_string_lossy());

    let mut dirs = Vec::new();
    if conf.starts_with("/etc/systemd") {
        dirs.push(Path::new("/usr/lib/systemd").join(&dropin_name));
        dirs.push(Path::new("/run/systemd").join(&dropin_name));
    }
    if let Some(parent) = conf.parent() {
        dirs.push(parent.join(&dropin_name));
    }
    dirs
}

/// Target values for lid handling and hibernation timing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerPolicy {
    pub lid_switch_action: String,
    pub hibernate_delay: String,
    pub hibernate_mode: String,
}

pub struct PowerPolicyConfigurator {
    logind_conf: PathBuf,
    sleep_conf: PathBuf,
    policy: PowerPolicy,
}

impl PowerPolicyConfigurator {
    pub fn new(logind_conf: PathBuf, sleep_conf: PathBuf, policy: PowerPolicy) -> Self {
        Self {
            logind_conf,
            sleep_conf,
            policy,
        }
    }

    fn logind_pairs(&self) -> Vec<(&str, &str)> {
        LID_SWITCH_KEYS
            .iter()
            .map(|key| (*key, self.policy.lid_switch_action.as_str()))
            .collect()
    }

    fn sleep_pairs(&self) -> Vec<(&str, &str)> {
        vec![
            (HIBERNATE_DELAY_KEY, self.policy.hibernate_delay.as_str()),
            (HIBERNATE_MODE_KEY, self.policy.hibernate_mode.as_str()),
        ]
    }

    /// Edit both files in place; running twice leaves them as after one run
    pub fn apply(&self) -> Result<Vec<Warning>> {
        let mut warnings = Vec::new();

        let logind_pairs = self.logind_pairs();
        self.edit(&self.logind_conf, LOGIND_SECTION, &logind_pairs)?;
        warnings.extend(self.check_dropins(&self.logind_conf, &logind_pairs)?);

        let sleep_pairs = self.sleep_pairs();
        self.edit(&self.sleep_conf, SLEEP_SECTION, &sleep_pairs)?;
        warnings.extend(self.check_dropins(&self.sleep_conf, &sleep_pairs)?);

        Ok(warnings)
    }

    fn edit(&self, path: &Path, section: &str, pairs: &[(&str, &str)]) -> Result<()> {
        let current = read_file_or_empty(path)?;
        let updated = upsert_section(&current, section, pairs);
        if write_file_if_changed(path, &updated)? {
            info!("power: updated [{}] in {}", section, path.display());
        } else {
            debug!("power: {} already up to date", path.display());
        }
        Ok(())
    }

    fn check_dropins(&self, conf: &Path, pairs: &[(&str, &str)]) -> Result<Vec<Warning>> {
        let keys: Vec<&str> = pairs.iter().map(|(k, _)| *k).collect();
        let mut warnings = Vec::new();

        for dir in dropin_dirs(conf) {
            let pattern = format!("{}/*.conf", dir.display());
            let Ok(entries) = glob::glob(&pattern) else {
                continue;
            };
            for entry in entries.flatten() {
                let content = read_file_or_empty(&entry)?;
                for (key, value) in active_settings(&content, &keys) {
                    let ours = pairs.iter().any(|(k, v)| *k == key && *v == value);
                    if !ours {
                        warnings.push(Warning::DropInOverride {
                            file: entry.display().to_string(),
                            key: key.to_string(),
                        });
                    }
                }
            }
        }

        Ok(warnings)
    }
}
