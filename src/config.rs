// Configuration parsing for hibernate-setup
// SPDX-License-Identifier: GPL-3.0-or-later

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use glob::glob;
use thiserror::Error;

use crate::defaults;
use crate::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Missing key: {0}")]
    MissingKey(String),
    #[error("Parse error for {0}: {1}")]
    ParseError(String, String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration paths
pub const ETC_CONFIG: &str = "/etc/hibernate-setup.conf";
pub const DROPIN_BASES: [&str; 3] = ["/usr/lib", "/run", "/etc"];
pub const DROPIN_DIR: &str = "hibernate-setup.conf.d";

/// Configuration holder
#[derive(Debug, Clone, Default)]
pub struct Config {
    values: HashMap<String, String>,
}

impl Config {
    /// Load configuration from all sources
    pub fn load() -> Result<Self> {
        let dropin_dirs: Vec<PathBuf> = DROPIN_BASES
            .iter()
            .map(|base| Path::new(base).join(DROPIN_DIR))
            .collect();
        Self::load_from(Path::new(ETC_CONFIG), &dropin_dirs)
    }

    /// Load the main file, then `*.conf` fragments from the given directories.
    /// A fragment in a later directory shadows one with the same basename.
    pub fn load_from(main: &Path, dropin_dirs: &[PathBuf]) -> Result<Self> {
        let mut values = HashMap::new();

        if main.exists() {
            match Self::parse_config(main) {
                Ok(cfg) => values.extend(cfg),
                Err(e) => warn!("Could not load {}: {}", main.display(), e),
            }
        }

        let mut config_files: HashMap<String, PathBuf> = HashMap::new();
        for dir in dropin_dirs {
            let pattern = format!("{}/*.conf", dir.display());
            if let Ok(entries) = glob(&pattern) {
                for entry in entries.flatten() {
                    if entry.is_file() {
                        if let Some(basename) = entry.file_name() {
                            debug!("Found {}", entry.display());
                            config_files.insert(basename.to_string_lossy().to_string(), entry.clone());
                        }
                    }
                }
            }
        }

        // Sort by basename and load in order
        let mut sorted_files: Vec<_> = config_files.into_iter().collect();
        sorted_files.sort_by(|a, b| a.0.cmp(&b.0));

        for (_, path) in sorted_files {
            info!("Load: {}", path.display());
            match Self::parse_config(&path) {
                Ok(cfg) => values.extend(cfg),
                Err(e) => warn!("Could not load {}: {}", path.display(), e),
            }
        }

        Ok(Self { values })
    }

    /// Build a configuration from literal pairs
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            values: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Parse a single config file
    fn parse_config<P: AsRef<Path>>(path: P) -> Result<HashMap<String, String>> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse_str(&content))
    }

    fn parse_str(content: &str) -> HashMap<String, String> {
        let mut config = HashMap::new();

        for line in content.lines() {
            let line = line.trim();

            // Skip comments and empty lines
            if line.starts_with('#') || !line.contains('=') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim().trim_matches('"').trim_matches('\'');
                config.insert(key.trim().to_string(), value.to_string());
            }
        }

        config
    }

    /// Get a string value
    pub fn get(&self, key: &str) -> Result<&str> {
        self.values
            .get(key)
            .map(|s| s.as_str())
            .ok_or_else(|| ConfigError::MissingKey(key.to_string()))
    }

    /// Get value as specific type
    pub fn get_as<T: std::str::FromStr>(&self, key: &str) -> Result<T>
    where
        T::Err: std::fmt::Display,
    {
        let value = self.get(key)?;
        value
            .parse()
            .map_err(|e: T::Err| ConfigError::ParseError(key.to_string(), e.to_string()))
    }
}

/// Everything a provisioning run needs to know about paths and policy values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Dedicated btrfs subvolume holding the swap file
    pub swap_dir: PathBuf,
    pub swap_file: PathBuf,
    pub swap_headroom_gib: u64,
    pub swap_priority: i32,
    pub fstab: PathBuf,
    pub policy_module: String,
    pub work_dir: PathBuf,
    pub dracut_conf: PathBuf,
    pub logind_conf: PathBuf,
    pub sleep_conf: PathBuf,
    pub lid_switch_action: String,
    pub hibernate_delay: String,
    pub hibernate_mode: String,
    pub lock_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        let swap_dir = PathBuf::from(defaults::SWAP_DIR);
        Settings {
            swap_file: swap_dir.join(defaults::SWAP_FILE_NAME),
            swap_dir,
            swap_headroom_gib: defaults::SWAP_HEADROOM_GIB,
            swap_priority: defaults::SWAP_PRIORITY,
            fstab: PathBuf::from(defaults::FSTAB_PATH),
            policy_module: defaults::POLICY_MODULE.to_string(),
            work_dir: PathBuf::from(defaults::WORK_DIR),
            dracut_conf: PathBuf::from(defaults::DRACUT_RESUME_CONF),
            logind_conf: PathBuf::from(defaults::LOGIND_CONF),
            sleep_conf: PathBuf::from(defaults::SLEEP_CONF),
            lid_switch_action: defaults::LID_SWITCH_ACTION.to_string(),
            hibernate_delay: defaults::HIBERNATE_DELAY.to_string(),
            hibernate_mode: defaults::HIBERNATE_MODE.to_string(),
            lock_path: PathBuf::from(defaults::LOCK_PATH),
        }
    }
}

impl Settings {
    pub fn from_config(config: &Config) -> Result<Self> {
        let swap_dir = config.get("swap_dir").unwrap_or(defaults::SWAP_DIR);
        let swap_dir = PathBuf::from(swap_dir.trim_end_matches('/'));
        if !swap_dir.is_absolute() || swap_dir == Path::new("/") {
            return Err(ConfigError::ParseError(
                "swap_dir".to_string(),
                format!("{} is not a dedicated absolute directory", swap_dir.display()),
            ));
        }

        let swap_headroom_gib = match config.get_as::<u64>("swap_headroom_gib") {
            Ok(v) => v,
            Err(ConfigError::MissingKey(_)) => defaults::SWAP_HEADROOM_GIB,
            Err(e) => return Err(e),
        };

        let policy_module = config
            .get("policy_module")
            .unwrap_or(defaults::POLICY_MODULE)
            .to_string();
        if policy_module.is_empty()
            || !policy_module
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigError::ParseError(
                "policy_module".to_string(),
                format!("invalid module name '{}'", policy_module),
            ));
        }

        let mut settings = Settings::default();
        settings.swap_file = swap_dir.join(defaults::SWAP_FILE_NAME);
        settings.swap_dir = swap_dir;
        settings.swap_headroom_gib = swap_headroom_gib;
        settings.policy_module = policy_module;
        settings.lid_switch_action = config
            .get("lid_switch_action")
            .unwrap_or(defaults::LID_SWITCH_ACTION)
            .to_string();
        settings.hibernate_delay = config
            .get("hibernate_delay")
            .unwrap_or(defaults::HIBERNATE_DELAY)
            .to_string();
        settings.hibernate_mode = config
            .get("hibernate_mode")
            .unwrap_or(defaults::HIBERNATE_MODE)
            .to_string();
        Ok(settings)
    }

    /// Point every host file at the same relative location under `root`
    pub fn rooted_at(mut self, root: &Path) -> Self {
        let reroot = |p: &Path| root.join(p.strip_prefix("/").unwrap_or(p));
        self.swap_file = reroot(&self.swap_file);
        self.swap_dir = reroot(&self.swap_dir);
        self.fstab = reroot(&self.fstab);
        self.work_dir = reroot(&self.work_dir);
        self.dracut_conf = reroot(&self.dracut_conf);
        self.logind_conf = reroot(&self.logind_conf);
        self.sleep_conf = reroot(&self.sleep_conf);
        self.lock_path = reroot(&self.lock_path);
        self
    }
}
