//! Container daemon restore and shutdown
//!
//! At startup the daemon rebuilds its view of every container from the
//! on-disk repository, reconciles it with what the task runtime still has
//! running, and then restarts, removes or prepares each container:
//!
//! ```text
//!   repository ──► load ──► register ──► links ──► reconcile
//!                                                     │
//!                         active sandboxes ◄──────────┤
//!                                │                    │ restart / remove sets
//!                         network init (fatal)        │
//!                                │                    ▼
//!                                └──────────────► restart ──► remove ──► mounts
//! ```
//!
//! Every arrow is a barrier: a phase runs one job per container on the
//! shared [`WorkerPool`] and only hands over once all of them have finished.
//! Per-container failures are logged and isolated; only network controller
//! initialization can fail the whole restore.

mod index;
mod links;
mod loader;
mod names;
mod pool;
mod reconcile;
mod registrar;
mod removal;
mod restart;
mod shutdown;

pub use index::{ContainerIndex, IndexError};
pub use links::LinkGraph;
pub use loader::ContainerLoader;
pub use names::{normalize_name, NameError, NameIndex};
pub use pool::{adjust_parallel_limit, WorkerPool, JOBS_PER_CPU};
pub use registrar::{parse_link, LinkError, RegisterError};
pub use restart::{Completion, CompletionWaiter, LINK_WAIT};
pub use shutdown::SHUTDOWN_GRACE;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::config::DaemonConfig;
use crate::container::Container;
use crate::image::ImageService;
use crate::network::{NetworkController, NetworkError};
use crate::ops::{ContainerOps, Teardown};
use crate::persist::Store;
use crate::runtime::{RuntimeError, TaskRuntime};

/// Collaborators the daemon drives but does not implement
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn Store>,
    pub runtime: Arc<dyn TaskRuntime>,
    pub image: Arc<dyn ImageService>,
    pub network: Arc<dyn NetworkController>,
    pub ops: Arc<dyn ContainerOps>,
    pub volumes: Option<Arc<dyn Teardown>>,
    pub plugins: Option<Arc<dyn Teardown>>,
    pub metrics: Option<Arc<dyn Teardown>>,
    /// Auxiliary metadata store
    pub metadata: Option<Arc<dyn Teardown>>,
}

impl Services {
    pub fn new(
        store: Arc<dyn Store>,
        runtime: Arc<dyn TaskRuntime>,
        image: Arc<dyn ImageService>,
        network: Arc<dyn NetworkController>,
        ops: Arc<dyn ContainerOps>,
    ) -> Self {
        Self {
            store,
            runtime,
            image,
            network,
            ops,
            volumes: None,
            plugins: None,
            metrics: None,
            metadata: None,
        }
    }

    pub fn with_volumes(mut self, volumes: Arc<dyn Teardown>) -> Self {
        self.volumes = Some(volumes);
        self
    }

    pub fn with_plugins(mut self, plugins: Arc<dyn Teardown>) -> Self {
        self.plugins = Some(plugins);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn Teardown>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_metadata(mut self, metadata: Arc<dyn Teardown>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Outcome of a restore, IDs sorted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Containers registered in the index
    pub registered: Vec<String>,
    /// Containers the restart pass tried to start
    pub restarted: Vec<String>,
    /// Containers the removal pass tried to remove
    pub removed: Vec<String>,
}

pub struct Daemon {
    config: DaemonConfig,
    services: Services,
    containers: ContainerIndex,
    names: NameIndex,
    links: Mutex<LinkGraph>,
    /// Cluster membership, set once the node joined a cluster
    cluster: Mutex<Option<Arc<dyn Teardown>>>,
    shutting_down: AtomicBool,
    /// Process-level cancellation, honored by task runtime calls
    cancel: CancellationToken,
}

impl Daemon {
    pub fn new(config: DaemonConfig, services: Services) -> Arc<Self> {
        Arc::new(Self {
            config,
            services,
            containers: ContainerIndex::new(),
            names: NameIndex::new(),
            links: Mutex::new(LinkGraph::new()),
            cluster: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn containers(&self) -> &ContainerIndex {
        &self.containers
    }

    pub fn names(&self) -> &NameIndex {
        &self.names
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Containers `id` links to, which must be started first
    pub fn parents(&self, id: &str) -> Vec<String> {
        self.link_graph().parents(id)
    }

    /// Containers linking to `id`
    pub fn children(&self, id: &str) -> Vec<String> {
        self.link_graph().children(id)
    }

    fn link_graph(&self) -> MutexGuard<'_, LinkGraph> {
        self.links.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record that the node joined a cluster
    pub fn joins_cluster(&self, cluster: Arc<dyn Teardown>) {
        *self.cluster.lock().unwrap_or_else(PoisonError::into_inner) = Some(cluster);
    }

    fn take_cluster(&self) -> Option<Arc<dyn Teardown>> {
        self.cluster
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Run a task runtime call, giving up if the daemon is canceled
    pub(crate) async fn rpc<T, F>(&self, call: F) -> Result<T, RuntimeError>
    where
        F: Future<Output = Result<T, RuntimeError>>,
    {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(RuntimeError::Canceled),
            res = call => res,
        }
    }

    /// Rebuild in-memory state from the repository and bring every
    /// container in line with its policy
    pub async fn restore(self: &Arc<Self>) -> Result<RestoreReport, DaemonError> {
        log::info!("Loading containers: start.");

        let repository = self.config.repository();
        let ids = loader::read_repository(&repository).await?;

        let pool = WorkerPool::for_units(ids.len());
        log::debug!(
            "Restoring {} container directories with parallelism {}",
            ids.len(),
            pool.limit()
        );

        let loader = ContainerLoader::new(&self.services);
        let loaded = loader.load_all(&pool, ids).await;

        let registered = self.register_all(&pool, loaded).await;
        self.register_all_links(&pool, &registered).await;

        let sets = self.reconcile_all(&pool, &registered).await;
        let (restart, remove, sandboxes) = sets.into_parts();

        // The controller has to see every sandbox that's still in use
        self.services
            .network
            .init(&self.config, &sandboxes)
            .await
            .map_err(DaemonError::NetworkInit)?;

        let report = RestoreReport {
            registered: sorted(registered.iter().map(|c| c.id().to_string())),
            restarted: sorted(restart.keys().cloned()),
            removed: sorted(remove.iter().cloned()),
        };

        // Containers neither pass touches still need their volumes mounted
        let rest: Vec<Arc<Container>> = registered
            .into_iter()
            .filter(|c| !restart.contains_key(c.id()) && !remove.contains(c.id()))
            .collect();

        self.restart_containers(&pool, restart, None).await;
        self.remove_containers(&pool, &remove).await;
        self.prepare_all_mount_points(&pool, rest).await;

        log::info!("Loading containers: done.");
        Ok(report)
    }
}

fn sorted(ids: impl Iterator<Item = String>) -> Vec<String> {
    let mut ids: Vec<String> = ids.collect();
    ids.sort();
    ids
}

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("Error initializing network controller: {0}")]
    NetworkInit(#[source] NetworkError),
}
