//! Removal and mount-preparation passes

use std::collections::HashSet;
use std::sync::Arc;

use crate::container::Container;
use crate::ops::RemoveOptions;

use super::{Daemon, WorkerPool};

impl Daemon {
    /// Force-remove auto-remove containers along with their volumes
    pub(super) async fn remove_containers(
        self: &Arc<Self>,
        pool: &WorkerPool,
        ids: &HashSet<String>,
    ) {
        let opts = RemoveOptions {
            force: true,
            remove_volumes: true,
        };

        pool.run(ids.iter().cloned(), |id| {
            let daemon = Arc::clone(self);
            async move {
                if let Err(e) = daemon.services.ops.remove(&id, opts).await {
                    log::error!("Failed to remove container {}: {}", id, e);
                }
            }
        })
        .await;
    }

    /// Mount volumes of containers the restart pass didn't start
    ///
    /// Runs last so volume plugins running in restarted containers are up.
    pub(super) async fn prepare_all_mount_points(
        self: &Arc<Self>,
        pool: &WorkerPool,
        containers: Vec<Arc<Container>>,
    ) {
        pool.run(containers, |container| {
            let daemon = Arc::clone(self);
            async move {
                if let Err(e) = daemon.services.ops.prepare_mount_points(&container).await {
                    log::error!(
                        "Failed to prepare mount points for container {}: {}",
                        container.id(),
                        e
                    );
                }
            }
        })
        .await;
    }
}
