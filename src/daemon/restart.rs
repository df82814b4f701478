//! Restart scheduling
//!
//! Every container in the restart set gets a [`Completion`]. Before starting,
//! a container waits for the completions of the containers it links to, up to
//! [`LINK_WAIT`] in total, and it always closes its own completion once its
//! start attempt is over, whether it succeeded or not.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::container::{Container, ContainerRecord};

use super::{Daemon, WorkerPool};

/// How long a container waits for the containers it links to
pub const LINK_WAIT: Duration = Duration::from_secs(5);

/// Containers to start, each with the signal closed once its attempt is over
pub type RestartSet = HashMap<String, (Arc<Container>, Completion)>;

/// Broadcast-once signal that a container's restart attempt is over
///
/// Dropping it without calling [`close`](Self::close) releases the waiters too.
#[derive(Debug)]
pub struct Completion {
    tx: watch::Sender<bool>,
}

impl Completion {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn waiter(&self) -> CompletionWaiter {
        CompletionWaiter {
            rx: self.tx.subscribe(),
        }
    }

    pub fn close(self) {
        self.tx.send_replace(true);
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct CompletionWaiter {
    rx: watch::Receiver<bool>,
}

impl CompletionWaiter {
    /// Resolve once the completion is closed or dropped
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|done| *done).await;
    }

    pub fn is_closed(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }
}

impl Daemon {
    /// Whether a stopped container should be started by a restart pass
    ///
    /// Containers attached to swarm-scope networks only start once the node
    /// joined the cluster, so each pass picks one kind.
    pub(super) fn wants_restart(&self, record: &mut ContainerRecord, swarm: bool) -> bool {
        self.config.auto_restart
            && record.should_restart()
            && record.network_settings.has_swarm_endpoint == swarm
            && record.state.has_been_started_before
    }

    /// Start every container in `set`, children after the containers they link to
    pub(super) async fn restart_containers(
        self: &Arc<Self>,
        pool: &WorkerPool,
        set: RestartSet,
        cancel: Option<&CancellationToken>,
    ) {
        let waiters: Arc<HashMap<String, CompletionWaiter>> = Arc::new(
            set.iter()
                .map(|(id, (_, completion))| (id.clone(), completion.waiter()))
                .collect(),
        );

        let work = |(container, completion): (Arc<Container>, Completion)| {
            let daemon = Arc::clone(self);
            let waiters = Arc::clone(&waiters);
            async move {
                daemon.restart_one(&container, &waiters).await;
                completion.close();
            }
        };

        match cancel {
            Some(token) => pool.run_cancellable(token, set.into_values(), work).await,
            None => pool.run(set.into_values(), work).await,
        }
    }

    async fn restart_one(
        &self,
        container: &Arc<Container>,
        waiters: &HashMap<String, CompletionWaiter>,
    ) {
        let id = container.id();
        log::debug!("Starting container {}", id);

        // One deadline for all parents, not one per parent
        let deadline = Instant::now() + LINK_WAIT;
        for parent in self.parents(id) {
            let Some(waiter) = waiters.get(&parent) else {
                continue;
            };
            let mut waiter = waiter.clone();
            if tokio::time::timeout_at(deadline, waiter.wait()).await.is_err() {
                log::debug!("Gave up waiting for {} before starting {}", parent, id);
            }
        }

        if let Err(e) = self.services.ops.prepare_mount_points(container).await {
            log::error!("Failed to prepare mount points for container {}: {}", id, e);
        }
        if let Err(e) = self.services.ops.start(container).await {
            log::error!("Failed to start container {}: {}", id, e);
        }
    }

    /// Start containers with swarm endpoints once the node joined a cluster
    ///
    /// Returns the IDs that were picked, sorted.
    pub async fn restart_swarm_containers(self: &Arc<Self>) -> Vec<String> {
        let containers = self.containers.list();
        let pool = WorkerPool::for_units(containers.len());

        let mut set = RestartSet::new();
        for container in containers {
            let wanted = {
                let mut record = container.lock().await;
                !record.state.is_running()
                    && !record.state.is_paused()
                    && self.wants_restart(&mut record, true)
            };
            if wanted {
                set.insert(container.id().to_string(), (container, Completion::new()));
            }
        }

        let mut ids: Vec<String> = set.keys().cloned().collect();
        ids.sort();
        if !ids.is_empty() {
            log::info!("Starting {} containers with swarm endpoints", ids.len());
        }

        self.restart_containers(&pool, set, Some(&self.cancel)).await;
        ids
    }
}
