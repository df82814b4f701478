//! Task runtime client interface
//!
//! The task runtime owns the actual container processes. The daemon only
//! attaches to tasks it created earlier, asks for their status and deletes
//! the ones that exited while it was away.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Handle to a task attached in the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub id: String,
    pub pid: u32,
}

/// Live task status reported by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Created,
    Running,
    Paused,
    Pausing,
    Stopped,
    Unknown,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Pausing => "pausing",
            Self::Stopped => "stopped",
            Self::Unknown => "unknown",
        }
    }
}

/// Exit information returned when deleting a stopped task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskExit {
    pub exit_code: u32,
    pub exited_at: DateTime<Utc>,
}

#[async_trait]
pub trait TaskRuntime: Send + Sync {
    /// Attach to the task of container `id`
    async fn attach(&self, id: &str) -> Result<TaskHandle, RuntimeError>;

    async fn status(&self, task: &TaskHandle) -> Result<TaskStatus, RuntimeError>;

    /// Delete a stopped task, returning how it exited
    async fn delete(&self, task: &TaskHandle) -> Result<TaskExit, RuntimeError>;

    /// Close the client connection
    async fn close(&self) {}
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Runtime call canceled")]
    Canceled,

    #[error("Runtime error: {0}")]
    Rpc(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
