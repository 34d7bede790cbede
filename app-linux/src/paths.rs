use std::path::PathBuf;

use tunnel_watch_core::platform::AppPaths;

#[derive(Default)]
pub struct LinuxPaths;

impl AppPaths for LinuxPaths {
    fn config_path(&self) -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tunnel_watch")
            .join("config.toml")
    }

    fn log_path(&self) -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tunnel_monitor.log")
    }
}
