//! Offline collaborators
//!
//! Stand-ins used when restoring without a task runtime, e.g. to inspect
//! what a restore would do with a repository. No task survives (the runtime
//! reports every task as gone), nothing is mounted, and start/stop/remove are
//! only logged.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::DaemonConfig;
use crate::container::{Container, ContainerRecord, ExitStatus};
use crate::image::{ImageError, ImageService};
use crate::network::{ActiveSandboxes, NetworkController, NetworkError};
use crate::ops::{ContainerOps, OpsError, RemoveOptions, StopOptions};
use crate::persist::{Store, StoreError};
use crate::runtime::{RuntimeError, TaskExit, TaskHandle, TaskRuntime, TaskStatus};

/// Runtime with no tasks at all
#[derive(Debug, Default)]
pub struct OfflineRuntime;

#[async_trait]
impl TaskRuntime for OfflineRuntime {
    async fn attach(&self, id: &str) -> Result<TaskHandle, RuntimeError> {
        Err(RuntimeError::NotFound(id.to_string()))
    }

    async fn status(&self, task: &TaskHandle) -> Result<TaskStatus, RuntimeError> {
        Err(RuntimeError::NotFound(task.id.clone()))
    }

    async fn delete(&self, task: &TaskHandle) -> Result<TaskExit, RuntimeError> {
        Err(RuntimeError::NotFound(task.id.clone()))
    }
}

/// Image service that only computes paths under the daemon root
#[derive(Debug)]
pub struct LocalImageService {
    driver: String,
    root: PathBuf,
}

impl LocalImageService {
    pub fn new(config: &DaemonConfig) -> Self {
        Self {
            driver: config.storage_driver.clone(),
            root: config.root.join(&config.storage_driver),
        }
    }
}

#[async_trait]
impl ImageService for LocalImageService {
    fn storage_driver(&self) -> &str {
        &self.driver
    }

    async fn get_layer_mount_id(&self, id: &str) -> Result<String, ImageError> {
        Ok(id.to_string())
    }

    async fn mount(&self, record: &mut ContainerRecord) -> Result<(), ImageError> {
        record.base_fs = Some(self.root.join(&record.id).join("merged"));
        Ok(())
    }

    async fn unmount(&self, _record: &mut ContainerRecord) -> Result<(), ImageError> {
        Ok(())
    }

    async fn cleanup_mounts(&self, _mount_id: &str) -> Result<(), ImageError> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ImageError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct OfflineNetwork;

#[async_trait]
impl NetworkController for OfflineNetwork {
    async fn init(
        &self,
        _config: &DaemonConfig,
        active: &ActiveSandboxes,
    ) -> Result<(), NetworkError> {
        log::info!("Network controller initialized with {} active sandboxes", active.len());
        Ok(())
    }

    async fn stop(&self) {}
}

/// Container operations that only log what they would do
///
/// A stop marks the container stopped so state stays consistent.
#[derive(Debug, Default)]
pub struct LoggingOps;

#[async_trait]
impl ContainerOps for LoggingOps {
    async fn start(&self, container: &Arc<Container>) -> Result<(), OpsError> {
        log::info!("Would start container {}", container.id());
        Ok(())
    }

    async fn stop(&self, container: &Arc<Container>, opts: StopOptions) -> Result<(), OpsError> {
        log::info!(
            "Would stop container {} with {} (timeout {:?})",
            container.id(),
            opts.signal,
            opts.timeout
        );
        let mut record = container.lock().await;
        record.state.set_stopped(&ExitStatus::unknown());
        record.task = None;
        Ok(())
    }

    async fn remove(&self, id: &str, opts: RemoveOptions) -> Result<(), OpsError> {
        log::info!(
            "Would remove container {} (force: {}, volumes: {})",
            id,
            opts.force,
            opts.remove_volumes
        );
        Ok(())
    }

    async fn prepare_mount_points(&self, container: &Arc<Container>) -> Result<(), OpsError> {
        log::debug!("Would prepare mount points of container {}", container.id());
        Ok(())
    }

    fn init_health_monitor(&self, record: &ContainerRecord) {
        log::debug!("Would start health monitor of container {}", record.id);
    }
}

/// Store that reads through to another store and never writes
pub struct ReadOnlyStore<S> {
    inner: S,
}

impl<S: Store> ReadOnlyStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S: Store> Store for ReadOnlyStore<S> {
    async fn load(&self, id: &str) -> Result<ContainerRecord, StoreError> {
        self.inner.load(id).await
    }

    async fn checkpoint(&self, record: &ContainerRecord) -> Result<(), StoreError> {
        log::debug!("Dry run, not writing checkpoint of container {}", record.id);
        Ok(())
    }
}
