//! State reconciliation
//!
//! Brings each registered container's on-disk state in line with what the
//! task runtime reports, and sorts it into the restart set, the removal set,
//! or neither. Containers still running also contribute their sandbox to the
//! set handed to the network controller.
//!
//! ```text
//!   migrate ──► attach task ──► status ──┬─ stopped ──► delete task, keep exit
//!                                        ├─ alive, no live-restore ──► stop
//!                                        └─ alive
//!                 │
//!                 ▼
//!   running/paused on disk? ──► repair state, remount, sandbox options
//!                 │
//!                 ▼
//!   restart set | removal set | neither ──► clear stale removal flag
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use crate::container::{
    Container, ContainerRecord, ExitStatus, Migration, DEPRECATED_LOG_DRIVER, LOCAL_LOG_DRIVER,
    UNKNOWN_EXIT_CODE,
};
use crate::network::{build_sandbox_options, ActiveSandboxes, SandboxOptions};
use crate::runtime::TaskStatus;

use super::restart::{Completion, RestartSet};
use super::{Daemon, WorkerPool};

/// Aggregates built while reconciling, guarded by one lock
#[derive(Default)]
pub(super) struct RestoreSets {
    restart: RestartSet,
    remove: HashSet<String>,
    sandboxes: ActiveSandboxes,
}

impl RestoreSets {
    pub(super) fn into_parts(self) -> (RestartSet, HashSet<String>, ActiveSandboxes) {
        (self.restart, self.remove, self.sandboxes)
    }
}

/// What the runtime told us about a container's task
struct Liveness {
    alive: bool,
    status: TaskStatus,
    exit: Option<ExitStatus>,
}

impl Daemon {
    pub(super) async fn reconcile_all(
        self: &Arc<Self>,
        pool: &WorkerPool,
        containers: &[Arc<Container>],
    ) -> RestoreSets {
        let sets = Arc::new(Mutex::new(RestoreSets::default()));

        pool.run(containers.iter().cloned(), |container| {
            let daemon = Arc::clone(self);
            let sets = Arc::clone(&sets);
            async move { daemon.reconcile(container, &sets).await }
        })
        .await;

        let sets = std::mem::take(&mut *sets.lock().unwrap_or_else(PoisonError::into_inner));
        sets
    }

    async fn reconcile(&self, container: Arc<Container>, sets: &Mutex<RestoreSets>) {
        let id = container.id();
        let mut record = container.lock().await;

        let migrations = record.migrate();
        for migration in &migrations {
            match migration {
                Migration::RestartPolicy => {
                    log::debug!("Migrated restart-policy of container {}", id)
                }
                Migration::LogDriver => log::warn!(
                    "Migrated deprecated {} logging driver of container {} to {}",
                    DEPRECATED_LOG_DRIVER,
                    id,
                    LOCAL_LOG_DRIVER
                ),
            }
        }
        if !migrations.is_empty() {
            if let Err(e) = self.services.store.checkpoint(&record).await {
                log::error!("Failed to save migrated config of container {} to disk: {}", id, e);
            }
        }

        log::debug!(
            "Restoring container {} (running: {}, paused: {}, restarting: {})",
            id,
            record.state.is_running(),
            record.state.is_paused(),
            record.state.is_restarting()
        );

        let Some(mut live) = self.query_task(&mut record).await else {
            return;
        };

        if live.alive && !self.config.live_restore {
            log::debug!("Shutting down container {} considered alive by the runtime", id);
            drop(record);
            if let Err(e) = self.shutdown_container(&container).await {
                if !e.is_not_found() {
                    log::error!("Error shutting down container {}: {}", id, e);
                    return;
                }
            }
            record = container.lock().await;
            record.task = None;
            live.alive = false;
            live.status = TaskStatus::Stopped;
            record.reset_restart_manager(false);
        }

        if record.state.is_running() || record.state.is_paused() {
            self.repair_state(&mut record, &live, sets).await;
        }

        // Removal that was interrupted by a crash: neither finish nor restart it
        let interrupted_removal = record.state.removal_in_progress;

        if !interrupted_removal {
            if self.wants_restart(&mut record, false) {
                lock(sets)
                    .restart
                    .insert(id.to_string(), (Arc::clone(&container), Completion::new()));
            } else if record.host_config.auto_remove && (!self.config.live_restore || !live.alive) {
                lock(sets).remove.insert(id.to_string());
            }
        }

        if interrupted_removal {
            // The volumes and links the remover asked for are unknown, so
            // leave the container dead for someone to remove explicitly
            record.state.set_dead();
            match self.services.store.checkpoint(&record).await {
                Ok(()) => log::debug!("Reset removal-in-progress state of container {}", id),
                Err(e) => log::error!(
                    "Failed to update removal-in-progress state of container {}: {}",
                    id,
                    e
                ),
            }
        }

        log::debug!("Done restoring container {}", id);
    }

    /// Attach to the container's task and find out whether it's alive.
    ///
    /// `None` means reconciliation of this container has to stop here.
    async fn query_task(&self, record: &mut ContainerRecord) -> Option<Liveness> {
        let runtime = &self.services.runtime;
        let mut live = Liveness {
            alive: false,
            status: TaskStatus::Unknown,
            exit: None,
        };

        let task = match self.rpc(runtime.attach(&record.id)).await {
            Ok(task) => task,
            // The task is gone; state is corrected below
            Err(e) if e.is_not_found() => return Some(live),
            Err(e) => {
                log::error!(
                    "Failed to restore container {} with the task runtime: {}",
                    record.id,
                    e
                );
                return None;
            }
        };

        let status = match self.rpc(runtime.status(&task)).await {
            Ok(status) => status,
            Err(e) => {
                log::error!("Failed to get task status of container {}: {}", record.id, e);
                return Some(live);
            }
        };

        live.status = status;
        live.alive = status != TaskStatus::Stopped;

        if live.alive {
            record.task = Some(task);
            return Some(live);
        }

        log::debug!("Cleaning up dead container process {}", record.id);
        match self.rpc(runtime.delete(&task)).await {
            Ok(exit) => {
                let code = i32::try_from(exit.exit_code).unwrap_or(UNKNOWN_EXIT_CODE);
                live.exit = Some(ExitStatus::new(code, exit.exited_at));
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                log::error!("Failed to delete task of container {}: {}", record.id, e);
                return None;
            }
        }
        Some(live)
    }

    /// Fix up a container that was running or paused when the daemon went away
    async fn repair_state(
        &self,
        record: &mut ContainerRecord,
        live: &Liveness,
        sets: &Mutex<RestoreSets>,
    ) {
        let id = record.id.clone();
        log::debug!("Syncing container {} on-disk state with real state", id);

        // Restarts are driven by the restart pass, not the backoff timer
        record.restart_manager().cancel();

        if live.alive && record.state.is_paused() {
            log::info!("Restored container {} paused ({})", id, live.status.as_str());
            match live.status {
                TaskStatus::Paused | TaskStatus::Pausing => {}
                TaskStatus::Unknown | TaskStatus::Stopped => {
                    log::error!(
                        "Unexpected status {} for paused container {} during restore",
                        live.status.as_str(),
                        id
                    );
                }
                TaskStatus::Running | TaskStatus::Created => {
                    record.state.paused = false;
                    self.services.ops.init_health_monitor(record);
                    if let Err(e) = self.services.store.checkpoint(record).await {
                        log::error!("Failed to update paused container {} state: {}", id, e);
                    }
                }
            }
        } else if live.alive {
            log::debug!("Restoring healthcheck of container {}", id);
            self.services.ops.init_health_monitor(record);
        }

        if !live.alive {
            log::debug!("Setting stopped state of container {}", id);
            let exit = live.exit.clone().unwrap_or_else(ExitStatus::unknown);
            record.state.set_stopped(&exit);
            record.task = None;
            self.cleanup_container(record).await;
            if let Err(e) = self.services.store.checkpoint(record).await {
                log::error!("Failed to update stopped container {} state: {}", id, e);
            }
        }

        // Mount and unmount only to recompute the base filesystem path
        if let Err(e) = self.services.image.mount(record).await {
            log::warn!("Failed to mount container {} to get BaseFs path: {}", id, e);
        } else if let Err(e) = self.services.image.unmount(record).await {
            log::warn!("Failed to unmount container {} to get BaseFs path: {}", id, e);
        }

        record.reset_restart_manager(false);

        if !record.host_config.network_mode.is_container() && record.state.is_running() {
            let options = build_sandbox_options(record).unwrap_or_else(|e| {
                log::warn!("Failed to build sandbox options to restore container {}: {}", id, e);
                SandboxOptions::bare(&id)
            });
            let sandbox_id = record.network_settings.sandbox_id.clone();
            if sandbox_id.is_empty() {
                log::debug!("Container {} is running without a sandbox", id);
            } else {
                lock(sets).sandboxes.insert(sandbox_id, options);
            }
        }
    }
}

fn lock(sets: &Mutex<RestoreSets>) -> std::sync::MutexGuard<'_, RestoreSets> {
    sets.lock().unwrap_or_else(PoisonError::into_inner)
}
