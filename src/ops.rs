//! Container operations the daemon delegates to the normal lifecycle paths
//!
//! Restore never starts, stops or removes a container by itself; it goes
//! through the same paths an API request would use.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::Signal;

use crate::container::{Container, ContainerRecord};

/// How to stop a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopOptions {
    pub signal: Signal,
    /// Grace period before SIGKILL; `None` waits for the exit without forcing it
    pub timeout: Option<Duration>,
}

impl StopOptions {
    pub fn for_record(record: &ContainerRecord) -> Self {
        Self {
            signal: record.stop_signal(),
            timeout: record.stop_grace(),
        }
    }
}

/// How to remove a container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    pub force: bool,
    pub remove_volumes: bool,
}

#[async_trait]
pub trait ContainerOps: Send + Sync {
    async fn start(&self, container: &Arc<Container>) -> Result<(), OpsError>;

    /// Stop the container and return once its task has exited
    async fn stop(&self, container: &Arc<Container>, opts: StopOptions) -> Result<(), OpsError>;

    async fn remove(&self, id: &str, opts: RemoveOptions) -> Result<(), OpsError>;

    /// Mount the container's volumes
    async fn prepare_mount_points(&self, container: &Arc<Container>) -> Result<(), OpsError>;

    /// (Re)start health checks; called with the container lock held
    fn init_health_monitor(&self, record: &ContainerRecord);
}

/// A shared service that only needs to be told to shut down
#[async_trait]
pub trait Teardown: Send + Sync {
    async fn shutdown(&self) -> Result<(), OpsError>;
}

#[derive(Debug, thiserror::Error)]
pub enum OpsError {
    #[error("No such container: {0}")]
    NotFound(String),

    #[error("{op} failed for {id}: {reason}")]
    Failed {
        op: &'static str,
        id: String,
        reason: String,
    },

    #[error("Shutdown failed: {0}")]
    Shutdown(String),
}

impl OpsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
