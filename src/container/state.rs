//! Container state machine
//!
//! ```text
//!     ┌─────────┐ start  ┌─────────┐ pause  ┌────────┐
//!     │ Created ├───────►│ Running │◄──────►│ Paused │
//!     └─────────┘        └────┬────┘ resume └───┬────┘
//!                             │ exit/stop       │ task gone
//!                        ┌────▼────┐            │
//!                        │ Exited  │◄───────────┘
//!                        └────┬────┘
//!                             │ remove (interrupted)
//!                        ┌────▼────┐
//!                        │  Dead   │
//!                        └─────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exit code recorded when a container stopped without a known exit status.
pub const UNKNOWN_EXIT_CODE: i32 = 255;

/// How a container's task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    pub exit_code: i32,
    pub exited_at: Option<DateTime<Utc>>,
}

impl ExitStatus {
    pub fn new(exit_code: i32, exited_at: DateTime<Utc>) -> Self {
        Self {
            exit_code,
            exited_at: Some(exited_at),
        }
    }

    /// Exit status for a task that vanished without reporting one
    pub fn unknown() -> Self {
        Self {
            exit_code: UNKNOWN_EXIT_CODE,
            exited_at: None,
        }
    }
}

/// Persisted live state of a container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct State {
    pub running: bool,
    pub paused: bool,
    pub restarting: bool,
    pub dead: bool,
    pub removal_in_progress: bool,
    /// Main process PID (0 when not running)
    pub pid: u32,
    pub exit_code: i32,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub has_been_started_before: bool,
    pub has_been_manually_stopped: bool,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_restarting(&self) -> bool {
        self.restarting
    }

    pub fn set_running(&mut self, pid: u32) {
        self.running = true;
        self.paused = false;
        self.restarting = false;
        self.dead = false;
        self.error = None;
        self.pid = pid;
        self.exit_code = 0;
        self.started_at = Some(Utc::now());
        self.has_been_started_before = true;
    }

    pub fn set_stopped(&mut self, status: &ExitStatus) {
        self.running = false;
        self.paused = false;
        self.restarting = false;
        self.pid = 0;
        self.exit_code = status.exit_code;
        self.finished_at = Some(status.exited_at.unwrap_or_else(Utc::now));
    }

    /// Mark a removal that can no longer be completed automatically
    pub fn set_dead(&mut self) {
        self.removal_in_progress = false;
        self.dead = true;
    }

    /// Human readable status, as reported by listings
    pub fn as_str(&self) -> &'static str {
        if self.running {
            if self.paused {
                return "paused";
            }
            if self.restarting {
                return "restarting";
            }
            return "running";
        }
        if self.removal_in_progress {
            return "removing";
        }
        if self.dead {
            return "dead";
        }
        if self.started_at.is_none() {
            return "created";
        }
        "exited"
    }
}
