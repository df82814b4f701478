//! Restart policies and the per-container restart manager

use serde::{Deserialize, Serialize};

/// Restart policy mode
///
/// `Unset` only appears on records written before policies were always named;
/// the reconciler migrates it to `Disabled`. `"no"` is accepted as an alias
/// of `"disabled"` when reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartPolicyMode {
    #[default]
    #[serde(rename = "")]
    Unset,
    #[serde(rename = "disabled", alias = "no")]
    Disabled,
    #[serde(rename = "always")]
    Always,
    #[serde(rename = "unless-stopped")]
    UnlessStopped,
    #[serde(rename = "on-failure")]
    OnFailure,
}

impl RestartPolicyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unset => "",
            Self::Disabled => "disabled",
            Self::Always => "always",
            Self::UnlessStopped => "unless-stopped",
            Self::OnFailure => "on-failure",
        }
    }
}

/// Restart policy as configured on a container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartPolicy {
    pub name: RestartPolicyMode,
    pub maximum_retry_count: u32,
}

impl RestartPolicy {
    pub fn disabled() -> Self {
        Self {
            name: RestartPolicyMode::Disabled,
            maximum_retry_count: 0,
        }
    }

    pub fn always() -> Self {
        Self {
            name: RestartPolicyMode::Always,
            maximum_retry_count: 0,
        }
    }

    pub fn on_failure(maximum_retry_count: u32) -> Self {
        Self {
            name: RestartPolicyMode::OnFailure,
            maximum_retry_count,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self.name, RestartPolicyMode::Unset | RestartPolicyMode::Disabled)
    }
}

/// Restart bookkeeping for one container
///
/// Rebuilt (not persisted) every time the daemon starts; only the restart
/// count survives through the container record.
#[derive(Debug, Clone)]
pub struct RestartManager {
    policy: RestartPolicy,
    restart_count: u32,
    canceled: bool,
}

impl RestartManager {
    pub fn new(policy: RestartPolicy, restart_count: u32) -> Self {
        Self {
            policy,
            restart_count,
            canceled: false,
        }
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    /// Stop any pending restart. A canceled manager never restarts again.
    pub fn cancel(&mut self) {
        self.canceled = true;
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    /// Whether a container that exited with `exit_code` should be restarted
    pub fn should_restart(&self, exit_code: i32, manually_stopped: bool) -> bool {
        if self.canceled || self.policy.is_none() {
            return false;
        }
        match self.policy.name {
            RestartPolicyMode::Always => true,
            RestartPolicyMode::UnlessStopped => !manually_stopped,
            RestartPolicyMode::OnFailure => {
                // 0 means no retry limit
                let max = self.policy.maximum_retry_count;
                exit_code != 0 && (max == 0 || self.restart_count < max)
            }
            RestartPolicyMode::Unset | RestartPolicyMode::Disabled => false,
        }
    }
}
