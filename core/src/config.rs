//! Configuration loading and management.
//! Uses injected `AppPaths` so platform shells control where files live.

use std::fs;
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::platform::AppPaths;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("config is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config could not be serialized: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Timing and retry knobs of the monitor, as they appear in the TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub check_interval_secs: u64,
    pub retry_delay_secs: u64,
    pub max_retries: u32,
    pub probe_timeout_secs: u64,
    pub recovery_timeout_secs: u64,
    pub settle_delay_secs: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: 30,
            retry_delay_secs: 10,
            max_retries: 3,
            probe_timeout_secs: 10,
            recovery_timeout_secs: 30,
            settle_delay_secs: 5,
        }
    }
}

/// Resolved monitor configuration handed to the probe, recovery and state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    pub check_interval: Duration,
    pub retry_delay: Duration,
    pub max_retries: u32,
    pub probe_timeout: Duration,
    pub recovery_timeout: Duration,
    pub settle_delay: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            retry_delay: Duration::from_secs(10),
            max_retries: 3,
            probe_timeout: Duration::from_secs(10),
            recovery_timeout: Duration::from_secs(30),
            settle_delay: Duration::from_secs(5),
        }
    }
}

/// Upper bound for every configured delay or timeout.
pub const MAX_SETTING_SECS: u64 = 24 * 60 * 60;

impl MonitorSettings {
    /// Validate and convert second counts into durations.
    pub fn resolve(&self) -> Result<MonitorConfig, ConfigError> {
        let bounded = [
            ("check_interval_secs", self.check_interval_secs),
            ("retry_delay_secs", self.retry_delay_secs),
            ("probe_timeout_secs", self.probe_timeout_secs),
            ("recovery_timeout_secs", self.recovery_timeout_secs),
            ("settle_delay_secs", self.settle_delay_secs),
        ];
        if let Some((name, value)) = bounded.into_iter().find(|&(_, v)| v > MAX_SETTING_SECS) {
            return Err(ConfigError::Invalid(format!(
                "monitor.{name} = {value} exceeds the limit of {MAX_SETTING_SECS} seconds"
            )));
        }
        if self.check_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "monitor.check_interval_secs must be greater than zero".into(),
            ));
        }
        if self.probe_timeout_secs == 0 || self.recovery_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "monitor timeouts must be greater than zero".into(),
            ));
        }

        Ok(MonitorConfig {
            check_interval: Duration::from_secs(self.check_interval_secs),
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            max_retries: self.max_retries,
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
            recovery_timeout: Duration::from_secs(self.recovery_timeout_secs),
            settle_delay: Duration::from_secs(self.settle_delay_secs),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Tunnel CLI binary, either a bare name resolved through PATH or an absolute path.
    #[serde(default = "default_cli")]
    pub cli: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_viewer: Option<String>,
    #[serde(default)]
    pub monitor: MonitorSettings,
}

fn default_cli() -> String {
    "code".to_string()
}

impl Config {
    /// Load configuration from the provided paths. Creates a default file if missing.
    pub fn load_with(paths: &dyn AppPaths) -> Result<Self, ConfigError> {
        let config_path = paths.config_path();

        if !config_path.exists() {
            info!(
                "Config file not found at {:?}, creating default config",
                config_path
            );
            let default_config = Self::default();
            default_config.save_with(paths)?;
            return Ok(default_config);
        }

        debug!("Loading config from {:?}", config_path);
        let content = fs::read_to_string(&config_path)?;
        let config: Config = toml::from_str(&content)?;
        config.monitor.resolve()?;

        info!(
            "Loaded config: cli={}, check every {}s",
            config.cli, config.monitor.check_interval_secs
        );
        Ok(config)
    }

    /// Save configuration to the provided paths.
    pub fn save_with(&self, paths: &dyn AppPaths) -> Result<(), ConfigError> {
        let config_path = paths.config_path();

        // Create the directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&config_path, content)?;

        info!("Saved config to {:?}", config_path);
        Ok(())
    }

    /// Resolved timing configuration; falls back to defaults when the file holds invalid values.
    pub fn monitor_config(&self) -> MonitorConfig {
        self.monitor.resolve().unwrap_or_default()
    }

    /// Return configured PATH or fall back to current process PATH (cross-platform).
    pub fn get_path(&self) -> String {
        if let Some(path) = &self.path {
            return path.clone();
        }
        std::env::var("PATH").unwrap_or_default()
    }

    /// Program used to open the log file, defaulting to the desktop opener.
    pub fn log_viewer(&self) -> String {
        self.log_viewer.clone().unwrap_or_else(|| {
            if cfg!(target_os = "windows") {
                "notepad".to_string()
            } else if cfg!(target_os = "macos") {
                "open".to_string()
            } else {
                "xdg-open".to_string()
            }
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cli: default_cli(),
            path: None,
            log_viewer: None,
            monitor: MonitorSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct TempPaths(tempfile::TempDir);

    impl AppPaths for TempPaths {
        fn config_path(&self) -> PathBuf {
            self.0.path().join("nested").join("config.toml")
        }

        fn log_path(&self) -> PathBuf {
            self.0.path().join("tunnel_watch.log")
        }
    }

    fn temp_paths() -> TempPaths {
        TempPaths(tempfile::tempdir().unwrap())
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let paths = temp_paths();
        let config = Config::load_with(&paths).unwrap();
        assert_eq!(config, Config::default());
        assert!(paths.config_path().exists());
    }

    #[test]
    fn partial_monitor_table_keeps_other_defaults() {
        let paths = temp_paths();
        fs::create_dir_all(paths.config_path().parent().unwrap()).unwrap();
        fs::write(
            paths.config_path(),
            "cli = \"/opt/vscode/bin/code\"\n\n[monitor]\nmax_retries = 5\n",
        )
        .unwrap();

        let config = Config::load_with(&paths).unwrap();
        assert_eq!(config.cli, "/opt/vscode/bin/code");
        assert_eq!(config.monitor.max_retries, 5);
        assert_eq!(config.monitor.check_interval_secs, 30);

        let resolved = config.monitor_config();
        assert_eq!(resolved.max_retries, 5);
        assert_eq!(resolved.settle_delay, Duration::from_secs(5));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let paths = temp_paths();
        fs::create_dir_all(paths.config_path().parent().unwrap()).unwrap();
        fs::write(paths.config_path(), "[monitor]\ncheck_interval_secs = 0\n").unwrap();

        let err = Config::load_with(&paths).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn oversized_durations_are_rejected() {
        let settings = MonitorSettings {
            check_interval_secs: u64::MAX,
            ..MonitorSettings::default()
        };
        let err = settings.resolve().unwrap_err();
        assert!(err.to_string().contains("check_interval_secs"));

        let paths = temp_paths();
        fs::create_dir_all(paths.config_path().parent().unwrap()).unwrap();
        fs::write(paths.config_path(), "[monitor]\nsettle_delay_secs = 90000\n").unwrap();
        assert!(matches!(
            Config::load_with(&paths),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn one_day_is_still_accepted() {
        let settings = MonitorSettings {
            check_interval_secs: MAX_SETTING_SECS,
            ..MonitorSettings::default()
        };
        let resolved = settings.resolve().unwrap();
        assert_eq!(resolved.check_interval, Duration::from_secs(86_400));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let paths = temp_paths();
        fs::create_dir_all(paths.config_path().parent().unwrap()).unwrap();
        fs::write(paths.config_path(), "cli = [unterminated").unwrap();

        assert!(matches!(
            Config::load_with(&paths),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn saved_config_loads_back() {
        let paths = temp_paths();
        let mut config = Config::default();
        config.path = Some("/usr/local/bin:/usr/bin".into());
        config.log_viewer = Some("less".into());
        config.save_with(&paths).unwrap();

        let loaded = Config::load_with(&paths).unwrap();
        assert_eq!(loaded.get_path(), "/usr/local/bin:/usr/bin");
        assert_eq!(loaded.log_viewer(), "less");
    }

    #[test]
    fn default_monitor_config_matches_documented_values() {
        let config = MonitorConfig::default();
        assert_eq!(config.check_interval, Duration::from_secs(30));
        assert_eq!(config.retry_delay, Duration::from_secs(10));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.probe_timeout, Duration::from_secs(10));
        assert_eq!(config.recovery_timeout, Duration::from_secs(30));
    }
}
