//! Daemon configuration

use std::path::PathBuf;

pub const DEFAULT_ROOT: &str = "/var/lib/berthd";
pub const DEFAULT_SHUTDOWN_TIMEOUT: i64 = 15;
pub const DEFAULT_STORAGE_DRIVER: &str = "overlay2";

/// Settings that shape restore and shutdown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// Daemon state root
    pub root: PathBuf,
    /// Keep containers running across daemon restarts
    pub live_restore: bool,
    /// Restart containers according to their restart policy at startup
    pub auto_restart: bool,
    /// Minimum seconds to wait for containers at shutdown; negative waits forever
    pub shutdown_timeout: i64,
    pub storage_driver: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            live_restore: false,
            auto_restart: true,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            storage_driver: DEFAULT_STORAGE_DRIVER.to_string(),
        }
    }
}

impl DaemonConfig {
    /// Directory holding one subdirectory per container
    pub fn repository(&self) -> PathBuf {
        self.root.join("containers")
    }
}
