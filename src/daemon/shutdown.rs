//! Daemon shutdown
//!
//! Unless live-restore keeps containers running across the restart:
//! 1. Stop every running container in parallel, within the shutdown timeout
//! 2. Release each stopped container's layer mounts
//! 3. Shut down volumes, images, cluster membership, metrics, plugins
//! 4. Stop the network controller, close the runtime client and metadata store
//!
//! Every step runs even if an earlier one failed.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use crate::container::{Container, ContainerRecord};
use crate::ops::{OpsError, StopOptions, Teardown};

use super::Daemon;

/// Seconds added to a container's stop timeout when sizing the shutdown timeout
pub const SHUTDOWN_GRACE: i64 = 5;

async fn teardown(what: &str, service: Option<&Arc<dyn Teardown>>) {
    if let Some(service) = service {
        if let Err(e) = service.shutdown().await {
            log::error!("Error shutting down {}: {}", what, e);
        }
    }
}

impl Daemon {
    /// How long shutdown waits for containers before giving up on them.
    ///
    /// The longest of the configured timeout and every container's stop
    /// timeout plus [`SHUTDOWN_GRACE`]. `None` waits indefinitely, which is
    /// what a negative timeout anywhere asks for.
    pub async fn shutdown_timeout(&self) -> Option<Duration> {
        let mut timeout = self.config.shutdown_timeout;
        if timeout < 0 {
            return None;
        }

        for container in self.containers.list() {
            let stop_timeout = container.lock().await.stop_timeout();
            if stop_timeout < 0 {
                return None;
            }
            timeout = timeout.max(stop_timeout.saturating_add(SHUTDOWN_GRACE));
        }

        u64::try_from(timeout).ok().map(Duration::from_secs)
    }

    /// Stop a container through the normal stop path and wait for it to exit
    pub async fn shutdown_container(&self, container: &Arc<Container>) -> Result<(), OpsError> {
        let opts = StopOptions::for_record(&*container.lock().await);
        self.services.ops.stop(container, opts).await?;

        if container.lock().await.state.is_running() {
            return Err(OpsError::Failed {
                op: "stop",
                id: container.id().to_string(),
                reason: "container still running".to_string(),
            });
        }
        Ok(())
    }

    /// Release the filesystem of a container that is no longer running
    pub(super) async fn cleanup_container(&self, record: &mut ContainerRecord) {
        let image = &self.services.image;
        if let Err(e) = image.unmount(record).await {
            log::debug!("Unmounting container {} during cleanup: {}", record.id, e);
        }
        match image.get_layer_mount_id(&record.id).await {
            Ok(mount_id) => {
                if let Err(e) = image.cleanup_mounts(&mount_id).await {
                    log::warn!("Failed to clean up mounts of container {}: {}", record.id, e);
                }
            }
            Err(e) => log::debug!("No layer mount for container {}: {}", record.id, e),
        }
    }

    pub async fn shutdown(self: &Arc<Self>) {
        self.shutting_down.store(true, Ordering::SeqCst);

        if self.config.live_restore {
            let running = self.running_containers().await;
            if !running.is_empty() {
                log::info!(
                    "Live restore enabled, leaving {} containers running",
                    running.len()
                );
                teardown("metrics plugins", self.services.metrics.as_ref()).await;
                return;
            }
        }

        self.stop_all_containers().await;

        teardown("volume store", self.services.volumes.as_ref()).await;

        if let Err(e) = self.services.image.shutdown().await {
            log::error!("Error shutting down image service: {}", e);
        }

        if let Some(cluster) = self.take_cluster() {
            log::debug!("Start clean shutdown of cluster resources...");
            teardown("cluster", Some(&cluster)).await;
        }

        teardown("metrics plugins", self.services.metrics.as_ref()).await;
        // Plugins go after containers and layers
        teardown("plugins", self.services.plugins.as_ref()).await;

        self.services.network.stop().await;
        self.services.runtime.close().await;

        teardown("metadata store", self.services.metadata.as_ref()).await;

        log::info!("Daemon shutdown complete");
    }

    async fn running_containers(&self) -> Vec<Arc<Container>> {
        let mut running = Vec::new();
        for container in self.containers.list() {
            if container.lock().await.state.is_running() {
                running.push(container);
            }
        }
        running
    }

    async fn stop_all_containers(self: &Arc<Self>) {
        let timeout = self.shutdown_timeout().await;
        log::debug!(
            "Daemon configured with a {} seconds minimum shutdown timeout",
            self.config.shutdown_timeout
        );
        match timeout {
            Some(t) => log::debug!(
                "Start clean shutdown of all containers with a {:?} timeout...",
                t
            ),
            None => log::debug!("Start clean shutdown of all containers without a timeout..."),
        }

        let mut jobs = JoinSet::new();
        for container in self.running_containers().await {
            let daemon = Arc::clone(self);
            jobs.spawn(async move { daemon.drain_container(&container).await });
        }

        let drain = async {
            while let Some(res) = jobs.join_next().await {
                if let Err(e) = res {
                    log::error!("Container shutdown job failed: {}", e);
                }
            }
        };

        match timeout {
            Some(t) => {
                if tokio::time::timeout(t, drain).await.is_err() {
                    log::warn!("Containers did not stop within {:?}, continuing shutdown", t);
                }
            }
            None => drain.await,
        }
    }

    async fn drain_container(&self, container: &Arc<Container>) {
        let id = container.id();
        log::debug!("Shutting down container {}", id);

        if let Err(e) = self.shutdown_container(container).await {
            log::error!("Failed to shut down container {}: {}", id, e);
            return;
        }

        if let Ok(mount_id) = self.services.image.get_layer_mount_id(id).await {
            if let Err(e) = self.services.image.cleanup_mounts(&mount_id).await {
                log::warn!("Failed to clean up mounts of container {}: {}", id, e);
            }
        }

        log::debug!("Shut down container {}", id);
    }
}
