//! Configuration system: TOML file + env var overrides + device defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{RecoveryError, Result};

/// Default location of the optional configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/recovery.toml";

/// Full recovery configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub install: InstallConfig,
    pub ui: UiConfig,
    pub logging: LoggingConfig,
}

/// Fixed filesystem locations used by the maintenance environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub cache_root: PathBuf,
    pub data_root: PathBuf,
    pub metadata_root: PathBuf,
    pub system_root: PathBuf,
    /// Directory holding the command queue and persisted logs.
    pub log_dir: PathBuf,
    pub temporary_log: PathBuf,
    pub temporary_install: PathBuf,
    pub temporary_events: PathBuf,
    pub convert_fbe_dir: PathBuf,
    pub wipe_manifest: PathBuf,
    pub control_block: PathBuf,
    pub volume_table: PathBuf,
}

/// Install preconditions and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InstallConfig {
    /// Attempts beyond the first that may be driven through a reboot.
    pub retry_limit: u32,
    /// Minimum capacity when running on battery alone.
    pub battery_ok_pct: i32,
    /// Minimum capacity when a charger is connected.
    pub battery_with_charger_ok_pct: i32,
    pub battery_settle_timeout_secs: u64,
    /// Capacity some fuel gauges report until their profile is loaded.
    pub battery_placeholder_capacity: i32,
    pub bootreason_blacklist: Vec<String>,
    /// Offer "install anyway" after a signature failure (off in release builds).
    pub allow_unverified_override: bool,
    pub updater_binary: PathBuf,
    pub verifier_binary: PathBuf,
}

/// Interactive surface tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UiConfig {
    pub default_locale: String,
    pub error_screen_secs: u64,
    pub input_timeout_secs: u64,
}

/// Log retention and the structured event stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub keep_log_count: u32,
    /// Per-file cap applied when logs are carried across a cache reformat.
    pub saved_log_cap_bytes: u64,
    pub events_max_size_bytes: u64,
    pub events_max_rotated_files: u32,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            config_file: PathBuf::from(DEFAULT_CONFIG_PATH),
            cache_root: PathBuf::from("/cache"),
            data_root: PathBuf::from("/data"),
            metadata_root: PathBuf::from("/metadata"),
            system_root: PathBuf::from("/system"),
            log_dir: PathBuf::from("/cache/recovery"),
            temporary_log: PathBuf::from("/tmp/recovery.log"),
            temporary_install: PathBuf::from("/tmp/last_install"),
            temporary_events: PathBuf::from("/tmp/recovery.jsonl"),
            convert_fbe_dir: PathBuf::from("/tmp/convert_fbe"),
            wipe_manifest: PathBuf::from("/etc/recovery.wipe"),
            control_block: PathBuf::from("/dev/block/by-name/misc"),
            volume_table: PathBuf::from("/etc/recovery.fstab"),
        }
    }
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            retry_limit: 4,
            battery_ok_pct: 20,
            battery_with_charger_ok_pct: 15,
            battery_settle_timeout_secs: 10,
            battery_placeholder_capacity: 50,
            bootreason_blacklist: vec!["kernel_panic".to_string(), "Panic".to_string()],
            allow_unverified_override: true,
            updater_binary: PathBuf::from("/sbin/update_installer"),
            verifier_binary: PathBuf::from("/sbin/verify_package"),
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            default_locale: "en-US".to_string(),
            error_screen_secs: 5,
            input_timeout_secs: 120,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            keep_log_count: 10,
            saved_log_cap_bytes: 1 << 19,
            events_max_size_bytes: 4 * 1024 * 1024,
            events_max_rotated_files: 2,
        }
    }
}

impl PathsConfig {
    /// Queued command file, one argument per line.
    #[must_use]
    pub fn command_file(&self) -> PathBuf {
        self.log_dir.join("command")
    }

    /// Combined log of every session that modified flash.
    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.log_dir.join("log")
    }

    #[must_use]
    pub fn last_log(&self) -> PathBuf {
        self.log_dir.join("last_log")
    }

    #[must_use]
    pub fn last_kmsg(&self) -> PathBuf {
        self.log_dir.join("last_kmsg")
    }

    #[must_use]
    pub fn last_install(&self) -> PathBuf {
        self.log_dir.join("last_install")
    }

    #[must_use]
    pub fn last_locale(&self) -> PathBuf {
        self.log_dir.join("last_locale")
    }

    /// Breadcrumb consumed by the next boot to start FBE conversion.
    #[must_use]
    pub fn convert_fbe_file(&self) -> PathBuf {
        self.convert_fbe_dir.join("convert_fbe")
    }
}

impl Config {
    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), Path::to_path_buf);

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf)
                .map_err(|source| RecoveryError::io(&path_buf, source))?;
            toml::from_str::<Self>(&raw)?
        } else if path.is_some() {
            return Err(RecoveryError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for the session log.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // paths
        for (name, slot) in [
            ("RCV_PATHS_CACHE_ROOT", &mut self.paths.cache_root),
            ("RCV_PATHS_DATA_ROOT", &mut self.paths.data_root),
            ("RCV_PATHS_METADATA_ROOT", &mut self.paths.metadata_root),
            ("RCV_PATHS_LOG_DIR", &mut self.paths.log_dir),
            ("RCV_PATHS_TEMPORARY_LOG", &mut self.paths.temporary_log),
            ("RCV_PATHS_CONTROL_BLOCK", &mut self.paths.control_block),
            ("RCV_PATHS_VOLUME_TABLE", &mut self.paths.volume_table),
        ] {
            if let Some(raw) = lookup(name) {
                *slot = PathBuf::from(raw);
            }
        }

        // install
        if let Some(raw) = lookup("RCV_INSTALL_RETRY_LIMIT") {
            self.install.retry_limit = parse_env("RCV_INSTALL_RETRY_LIMIT", &raw)?;
        }
        if let Some(raw) = lookup("RCV_INSTALL_BATTERY_OK_PCT") {
            self.install.battery_ok_pct = parse_env("RCV_INSTALL_BATTERY_OK_PCT", &raw)?;
        }
        if let Some(raw) = lookup("RCV_INSTALL_BATTERY_WITH_CHARGER_OK_PCT") {
            self.install.battery_with_charger_ok_pct =
                parse_env("RCV_INSTALL_BATTERY_WITH_CHARGER_OK_PCT", &raw)?;
        }
        if let Some(raw) = lookup("RCV_INSTALL_ALLOW_UNVERIFIED_OVERRIDE") {
            self.install.allow_unverified_override =
                parse_env("RCV_INSTALL_ALLOW_UNVERIFIED_OVERRIDE", &raw)?;
        }

        // ui
        if let Some(raw) = lookup("RCV_UI_DEFAULT_LOCALE") {
            self.ui.default_locale = raw;
        }
        if let Some(raw) = lookup("RCV_UI_INPUT_TIMEOUT_SECS") {
            self.ui.input_timeout_secs = parse_env("RCV_UI_INPUT_TIMEOUT_SECS", &raw)?;
        }

        // logging
        if let Some(raw) = lookup("RCV_LOGGING_KEEP_LOG_COUNT") {
            self.logging.keep_log_count = parse_env("RCV_LOGGING_KEEP_LOG_COUNT", &raw)?;
        }

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        for (name, val) in [
            ("battery_ok_pct", self.install.battery_ok_pct),
            (
                "battery_with_charger_ok_pct",
                self.install.battery_with_charger_ok_pct,
            ),
        ] {
            if !(0..=100).contains(&val) {
                return Err(RecoveryError::InvalidConfig {
                    details: format!("install.{name} must be in [0, 100], got {val}"),
                });
            }
        }

        if self.install.battery_with_charger_ok_pct > self.install.battery_ok_pct {
            return Err(RecoveryError::InvalidConfig {
                details: "install.battery_with_charger_ok_pct must not exceed battery_ok_pct"
                    .to_string(),
            });
        }

        if self.install.retry_limit == 0 {
            return Err(RecoveryError::InvalidConfig {
                details: "install.retry_limit must be >= 1".to_string(),
            });
        }

        if self.logging.keep_log_count == 0 {
            return Err(RecoveryError::InvalidConfig {
                details: "logging.keep_log_count must be >= 1".to_string(),
            });
        }

        if self.logging.saved_log_cap_bytes == 0 {
            return Err(RecoveryError::InvalidConfig {
                details: "logging.saved_log_cap_bytes must be > 0".to_string(),
            });
        }

        for (name, path) in [
            ("cache_root", &self.paths.cache_root),
            ("data_root", &self.paths.data_root),
            ("metadata_root", &self.paths.metadata_root),
            ("system_root", &self.paths.system_root),
            ("log_dir", &self.paths.log_dir),
            ("temporary_log", &self.paths.temporary_log),
            ("temporary_install", &self.paths.temporary_install),
            ("convert_fbe_dir", &self.paths.convert_fbe_dir),
            ("control_block", &self.paths.control_block),
        ] {
            if !path.is_absolute() {
                return Err(RecoveryError::InvalidConfig {
                    details: format!("paths.{name} must be absolute, got {}", path.display()),
                });
            }
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|error| RecoveryError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}
