//! Container records
//!
//! A [`ContainerRecord`] is the persisted description of one container plus
//! the transient handles attached to it while the daemon runs. Once loaded it
//! is wrapped in a [`Container`], which owns the per-container lock; every
//! read-modify-checkpoint sequence happens while holding that lock.

pub mod restart;
pub mod state;

pub use restart::{RestartManager, RestartPolicy, RestartPolicyMode};
pub use state::{ExitStatus, State, UNKNOWN_EXIT_CODE};

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

use crate::image::RwLayer;
use crate::runtime::TaskHandle;

/// Stop timeout used when a container doesn't configure one (seconds)
pub const DEFAULT_STOP_TIMEOUT: i64 = 10;

/// Log driver that no longer exists; records using it are moved to [`LOCAL_LOG_DRIVER`]
pub const DEPRECATED_LOG_DRIVER: &str = "logentries";

/// Built-in log driver
pub const LOCAL_LOG_DRIVER: &str = "local";

/// Log driver configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    #[serde(rename = "type")]
    pub log_type: String,
    pub config: HashMap<String, String>,
}

/// Network mode (`bridge`, `host`, `none`, `container:<id>` or a user network)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkMode(pub String);

impl NetworkMode {
    pub fn new(mode: impl Into<String>) -> Self {
        Self(mode.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0.is_empty() || self.0 == "default"
    }

    pub fn is_bridge(&self) -> bool {
        self.0 == "bridge"
    }

    pub fn is_host(&self) -> bool {
        self.0 == "host"
    }

    pub fn is_none(&self) -> bool {
        self.0 == "none"
    }

    /// Joined another container's network namespace
    pub fn is_container(&self) -> bool {
        self.0.starts_with("container:")
    }

    pub fn is_user_defined(&self) -> bool {
        !self.is_default()
            && !self.is_bridge()
            && !self.is_host()
            && !self.is_none()
            && !self.is_container()
    }
}

/// Host-side configuration of a container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub restart_policy: RestartPolicy,
    pub log_config: LogConfig,
    pub network_mode: NetworkMode,
    pub auto_remove: bool,
    /// Legacy links, `name:alias` (alias defaults to name)
    pub links: Vec<String>,
    pub dns: Vec<String>,
    pub dns_search: Vec<String>,
    /// `host:ip` entries
    pub extra_hosts: Vec<String>,
}

/// Container configuration as requested at create time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    pub image: String,
    pub cmd: Vec<String>,
    pub hostname: String,
    pub domainname: String,
    pub stop_signal: Option<String>,
    /// Seconds; negative waits forever
    pub stop_timeout: Option<i64>,
}

/// Network attachment summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub sandbox_id: String,
    /// Attached to a network that only exists once the node joined a cluster
    pub has_swarm_endpoint: bool,
}

/// Persisted container record plus transient runtime handles
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    /// Storage driver the container's filesystem was created with
    pub driver: String,
    pub created: Option<DateTime<Utc>>,
    pub config: ContainerConfig,
    pub host_config: HostConfig,
    pub network_settings: NetworkSettings,
    pub state: State,
    pub restart_count: u32,

    #[serde(skip)]
    pub rw_layer: Option<RwLayer>,
    #[serde(skip)]
    pub base_fs: Option<PathBuf>,
    #[serde(skip)]
    pub task: Option<TaskHandle>,
    #[serde(skip)]
    restart_manager: Option<RestartManager>,
}

impl ContainerRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            created: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Bring records written by older daemons up to date.
    ///
    /// Returns what was changed so the caller can log it.
    pub fn migrate(&mut self) -> Vec<Migration> {
        let mut applied = Vec::new();

        // MaximumRetryCount is only valid with a policy, so drop it too
        if self.host_config.restart_policy.name == RestartPolicyMode::Unset {
            self.host_config.restart_policy = RestartPolicy::disabled();
            applied.push(Migration::RestartPolicy);
        }

        if self.host_config.log_config.log_type == DEPRECATED_LOG_DRIVER {
            self.host_config.log_config = LogConfig {
                log_type: LOCAL_LOG_DRIVER.to_string(),
                config: HashMap::new(),
            };
            applied.push(Migration::LogDriver);
        }

        applied
    }

    /// Restart manager, created from the current policy on first use
    pub fn restart_manager(&mut self) -> &mut RestartManager {
        let policy = self.host_config.restart_policy;
        let count = self.restart_count;
        self.restart_manager
            .get_or_insert_with(|| RestartManager::new(policy, count))
    }

    /// Cancel the current restart manager and start over with a fresh one
    pub fn reset_restart_manager(&mut self, reset_count: bool) {
        if let Some(rm) = self.restart_manager.as_mut() {
            rm.cancel();
        }
        if reset_count {
            self.restart_count = 0;
        }
        self.restart_manager = None;
    }

    pub fn should_restart(&mut self) -> bool {
        let exit_code = self.state.exit_code;
        let manually_stopped = self.state.has_been_manually_stopped;
        self.restart_manager().should_restart(exit_code, manually_stopped)
    }

    /// Seconds to wait after the stop signal before killing; negative waits forever
    pub fn stop_timeout(&self) -> i64 {
        self.config.stop_timeout.unwrap_or(DEFAULT_STOP_TIMEOUT)
    }

    pub fn stop_signal(&self) -> Signal {
        self.config
            .stop_signal
            .as_deref()
            .and_then(|s| {
                let name = s.to_uppercase();
                let name = if name.starts_with("SIG") {
                    name
                } else {
                    format!("SIG{}", name)
                };
                Signal::from_str(&name).ok()
            })
            .unwrap_or(Signal::SIGTERM)
    }

    /// Grace period before a forced kill; `None` means never force
    pub fn stop_grace(&self) -> Option<Duration> {
        let timeout = self.stop_timeout();
        u64::try_from(timeout).ok().map(Duration::from_secs)
    }
}

/// Backward-compatibility fix applied by [`ContainerRecord::migrate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Migration {
    RestartPolicy,
    LogDriver,
}

/// A registered container: stable ID plus the lock guarding its record
#[derive(Debug)]
pub struct Container {
    id: String,
    record: Mutex<ContainerRecord>,
}

impl Container {
    pub fn new(record: ContainerRecord) -> Self {
        Self {
            id: record.id.clone(),
            record: Mutex::new(record),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Take the per-container lock
    pub async fn lock(&self) -> MutexGuard<'_, ContainerRecord> {
        self.record.lock().await
    }
}
