//! Fake collaborators shared by the integration tests
//!
//! Every fake appends to one [`Events`] log so tests can check what happened
//! and in which order.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;

use berthd::config::{DaemonConfig, DEFAULT_STORAGE_DRIVER};
use berthd::container::{Container, ContainerRecord, ExitStatus};
use berthd::image::{ImageError, ImageService, LayerAccessor, RwLayer};
use berthd::network::{ActiveSandboxes, NetworkController, NetworkError};
use berthd::ops::{ContainerOps, OpsError, RemoveOptions, StopOptions, Teardown};
use berthd::persist::{FileStore, Store, StoreError};
use berthd::runtime::{RuntimeError, TaskExit, TaskHandle, TaskRuntime, TaskStatus};
use berthd::{Daemon, Services};

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

pub fn unique_test_dir() -> PathBuf {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = PathBuf::from(format!("/tmp/berthd-test-{}-{}", std::process::id(), id));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// A record created with the default storage driver
pub fn record(id: &str, name: &str) -> ContainerRecord {
    let mut rec = ContainerRecord::new(id, name);
    rec.driver = DEFAULT_STORAGE_DRIVER.to_string();
    rec
}

/// Ordered log of everything the fakes were asked to do
#[derive(Debug, Clone, Default)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn contains(&self, event: &str) -> bool {
        self.0.lock().unwrap().iter().any(|e| e == event)
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.0.lock().unwrap().iter().position(|e| e == event)
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

#[derive(Debug, Clone, Copy)]
struct FakeTask {
    status: TaskStatus,
    exit_code: u32,
}

#[derive(Debug)]
pub struct FakeRuntime {
    events: Events,
    tasks: Mutex<HashMap<String, FakeTask>>,
    attach_errors: Mutex<HashSet<String>>,
    delete_errors: Mutex<HashSet<String>>,
}

impl FakeRuntime {
    pub fn new(events: Events) -> Self {
        Self {
            events,
            tasks: Mutex::new(HashMap::new()),
            attach_errors: Mutex::new(HashSet::new()),
            delete_errors: Mutex::new(HashSet::new()),
        }
    }

    pub fn add_task(&self, id: &str, status: TaskStatus, exit_code: u32) {
        self.tasks
            .lock()
            .unwrap()
            .insert(id.to_string(), FakeTask { status, exit_code });
    }

    pub fn fail_attach(&self, id: &str) {
        self.attach_errors.lock().unwrap().insert(id.to_string());
    }

    pub fn fail_delete(&self, id: &str) {
        self.delete_errors.lock().unwrap().insert(id.to_string());
    }

    pub fn has_task(&self, id: &str) -> bool {
        self.tasks.lock().unwrap().contains_key(id)
    }
}

#[async_trait]
impl TaskRuntime for FakeRuntime {
    async fn attach(&self, id: &str) -> Result<TaskHandle, RuntimeError> {
        if self.attach_errors.lock().unwrap().contains(id) {
            return Err(RuntimeError::Rpc(format!("connection refused ({})", id)));
        }
        if self.tasks.lock().unwrap().contains_key(id) {
            Ok(TaskHandle {
                id: id.to_string(),
                pid: 4242,
            })
        } else {
            Err(RuntimeError::NotFound(id.to_string()))
        }
    }

    async fn status(&self, task: &TaskHandle) -> Result<TaskStatus, RuntimeError> {
        self.tasks
            .lock()
            .unwrap()
            .get(&task.id)
            .map(|t| t.status)
            .ok_or_else(|| RuntimeError::NotFound(task.id.clone()))
    }

    async fn delete(&self, task: &TaskHandle) -> Result<TaskExit, RuntimeError> {
        if self.delete_errors.lock().unwrap().contains(&task.id) {
            return Err(RuntimeError::Rpc(format!("task {} is busy", task.id)));
        }
        let removed = self.tasks.lock().unwrap().remove(&task.id);
        let task_exit = removed.ok_or_else(|| RuntimeError::NotFound(task.id.clone()))?;
        self.events.push(format!("delete-task:{}", task.id));
        Ok(TaskExit {
            exit_code: task_exit.exit_code,
            exited_at: Utc::now(),
        })
    }

    async fn close(&self) {
        self.events.push("runtime-close");
    }
}

/// Reads from the repository, fails every write
pub struct FailingStore {
    inner: FileStore,
}

impl FailingStore {
    pub fn new(inner: FileStore) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Store for FailingStore {
    async fn load(&self, id: &str) -> Result<ContainerRecord, StoreError> {
        self.inner.load(id).await
    }

    async fn checkpoint(&self, record: &ContainerRecord) -> Result<(), StoreError> {
        Err(StoreError::Io {
            path: PathBuf::from(&record.id),
            source: std::io::Error::new(std::io::ErrorKind::Other, "no space left on device"),
        })
    }
}

#[derive(Debug, Default)]
pub struct FakeLayers {
    missing: Mutex<HashSet<String>>,
}

impl FakeLayers {
    pub fn set_missing(&self, id: &str) {
        self.missing.lock().unwrap().insert(id.to_string());
    }
}

#[async_trait]
impl LayerAccessor for FakeLayers {
    async fn get_layer_by_id(&self, id: &str) -> Result<RwLayer, ImageError> {
        if self.missing.lock().unwrap().contains(id) {
            return Err(ImageError::LayerNotFound(id.to_string()));
        }
        Ok(RwLayer {
            mount_id: format!("mnt-{}", id),
        })
    }
}

#[derive(Debug)]
pub struct FakeImage {
    events: Events,
    layers: Option<Arc<FakeLayers>>,
}

impl FakeImage {
    pub fn new(events: Events, layers: Option<Arc<FakeLayers>>) -> Self {
        Self { events, layers }
    }
}

#[async_trait]
impl ImageService for FakeImage {
    fn storage_driver(&self) -> &str {
        DEFAULT_STORAGE_DRIVER
    }

    fn layer_accessor(&self) -> Option<Arc<dyn LayerAccessor>> {
        self.layers
            .as_ref()
            .map(|l| Arc::clone(l) as Arc<dyn LayerAccessor>)
    }

    async fn get_layer_mount_id(&self, id: &str) -> Result<String, ImageError> {
        Ok(format!("mnt-{}", id))
    }

    async fn mount(&self, record: &mut ContainerRecord) -> Result<(), ImageError> {
        record.base_fs = Some(PathBuf::from(format!("/fake/{}/merged", record.id)));
        self.events.push(format!("mount:{}", record.id));
        Ok(())
    }

    async fn unmount(&self, record: &mut ContainerRecord) -> Result<(), ImageError> {
        self.events.push(format!("unmount:{}", record.id));
        Ok(())
    }

    async fn cleanup_mounts(&self, mount_id: &str) -> Result<(), ImageError> {
        self.events.push(format!("cleanup:{}", mount_id));
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ImageError> {
        self.events.push("image-shutdown");
        Ok(())
    }
}

#[derive(Debug)]
pub struct FakeNetwork {
    events: Events,
    fail: Mutex<bool>,
    sandboxes: Mutex<Option<ActiveSandboxes>>,
}

impl FakeNetwork {
    pub fn new(events: Events) -> Self {
        Self {
            events,
            fail: Mutex::new(false),
            sandboxes: Mutex::new(None),
        }
    }

    pub fn set_fail(&self) {
        *self.fail.lock().unwrap() = true;
    }

    /// Sandboxes passed to init, if init was called
    pub fn sandboxes(&self) -> Option<ActiveSandboxes> {
        self.sandboxes.lock().unwrap().clone()
    }
}

#[async_trait]
impl NetworkController for FakeNetwork {
    async fn init(
        &self,
        _config: &DaemonConfig,
        active: &ActiveSandboxes,
    ) -> Result<(), NetworkError> {
        self.events.push("network-init");
        *self.sandboxes.lock().unwrap() = Some(active.clone());
        if *self.fail.lock().unwrap() {
            return Err(NetworkError::Init("bridge unavailable".to_string()));
        }
        Ok(())
    }

    async fn stop(&self) {
        self.events.push("network-stop");
    }
}

#[derive(Debug)]
pub struct FakeOps {
    events: Events,
    start_delays: Mutex<HashMap<String, Duration>>,
    stop_delay: Mutex<Option<Duration>>,
    ignore_stop: Mutex<bool>,
    fail_start: Mutex<HashSet<String>>,
    starts: Mutex<HashMap<String, Instant>>,
}

impl FakeOps {
    pub fn new(events: Events) -> Self {
        Self {
            events,
            start_delays: Mutex::new(HashMap::new()),
            stop_delay: Mutex::new(None),
            ignore_stop: Mutex::new(false),
            fail_start: Mutex::new(HashSet::new()),
            starts: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_start_delay(&self, id: &str, delay: Duration) {
        self.start_delays.lock().unwrap().insert(id.to_string(), delay);
    }

    pub fn set_stop_delay(&self, delay: Duration) {
        *self.stop_delay.lock().unwrap() = Some(delay);
    }

    /// Report stops as done without stopping anything
    pub fn ignore_stop(&self) {
        *self.ignore_stop.lock().unwrap() = true;
    }

    pub fn fail_start(&self, id: &str) {
        self.fail_start.lock().unwrap().insert(id.to_string());
    }

    /// When the start of `id` was issued
    pub fn started_at(&self, id: &str) -> Option<Instant> {
        self.starts.lock().unwrap().get(id).copied()
    }
}

#[async_trait]
impl ContainerOps for FakeOps {
    async fn start(&self, container: &Arc<Container>) -> Result<(), OpsError> {
        let id = container.id().to_string();
        self.starts.lock().unwrap().insert(id.clone(), Instant::now());
        self.events.push(format!("start:{}", id));

        let delay = self.start_delays.lock().unwrap().get(&id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_start.lock().unwrap().contains(&id) {
            return Err(OpsError::Failed {
                op: "start",
                id,
                reason: "exec format error".to_string(),
            });
        }

        container.lock().await.state.set_running(5000);
        Ok(())
    }

    async fn stop(&self, container: &Arc<Container>, _opts: StopOptions) -> Result<(), OpsError> {
        self.events.push(format!("stop:{}", container.id()));

        let delay = *self.stop_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if *self.ignore_stop.lock().unwrap() {
            return Ok(());
        }

        let mut rec = container.lock().await;
        rec.state.set_stopped(&ExitStatus::new(0, Utc::now()));
        rec.task = None;
        Ok(())
    }

    async fn remove(&self, id: &str, opts: RemoveOptions) -> Result<(), OpsError> {
        assert!(opts.force && opts.remove_volumes);
        self.events.push(format!("remove:{}", id));
        Ok(())
    }

    async fn prepare_mount_points(&self, container: &Arc<Container>) -> Result<(), OpsError> {
        self.events.push(format!("mounts:{}", container.id()));
        Ok(())
    }

    fn init_health_monitor(&self, record: &ContainerRecord) {
        self.events.push(format!("health:{}", record.id));
    }
}

#[derive(Debug)]
pub struct FakeTeardown {
    name: &'static str,
    events: Events,
    fail: bool,
}

#[async_trait]
impl Teardown for FakeTeardown {
    async fn shutdown(&self) -> Result<(), OpsError> {
        self.events.push(format!("teardown:{}", self.name));
        if self.fail {
            return Err(OpsError::Shutdown(format!("{} busy", self.name)));
        }
        Ok(())
    }
}

/// A repository directory plus a full set of fakes
pub struct Harness {
    pub dir: PathBuf,
    pub config: DaemonConfig,
    pub events: Events,
    pub runtime: Arc<FakeRuntime>,
    pub layers: Arc<FakeLayers>,
    pub network: Arc<FakeNetwork>,
    pub ops: Arc<FakeOps>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = unique_test_dir();
        let events = Events::default();
        Self {
            config: DaemonConfig {
                root: dir.clone(),
                ..Default::default()
            },
            dir,
            runtime: Arc::new(FakeRuntime::new(events.clone())),
            layers: Arc::new(FakeLayers::default()),
            network: Arc::new(FakeNetwork::new(events.clone())),
            ops: Arc::new(FakeOps::new(events.clone())),
            events,
        }
    }

    pub fn store(&self) -> FileStore {
        FileStore::new(self.config.repository())
    }

    pub async fn write(&self, rec: &ContainerRecord) {
        self.store().checkpoint(rec).await.unwrap();
    }

    pub async fn load(&self, id: &str) -> ContainerRecord {
        self.store().load(id).await.unwrap()
    }

    fn teardown(&self, name: &'static str) -> Arc<dyn Teardown> {
        Arc::new(FakeTeardown {
            name,
            events: self.events.clone(),
            fail: false,
        })
    }

    /// A service whose shutdown always fails
    pub fn failing_teardown(&self, name: &'static str) -> Arc<dyn Teardown> {
        Arc::new(FakeTeardown {
            name,
            events: self.events.clone(),
            fail: true,
        })
    }

    pub fn services_with_store(&self, store: Arc<dyn Store>) -> Services {
        Services::new(
            store,
            Arc::clone(&self.runtime) as Arc<dyn TaskRuntime>,
            Arc::new(FakeImage::new(self.events.clone(), Some(Arc::clone(&self.layers)))),
            Arc::clone(&self.network) as Arc<dyn NetworkController>,
            Arc::clone(&self.ops) as Arc<dyn ContainerOps>,
        )
        .with_volumes(self.teardown("volumes"))
        .with_plugins(self.teardown("plugins"))
        .with_metrics(self.teardown("metrics"))
        .with_metadata(self.teardown("metadata"))
    }

    pub fn daemon(&self) -> Arc<Daemon> {
        let store: Arc<dyn Store> = Arc::new(self.store());
        Daemon::new(self.config.clone(), self.services_with_store(store))
    }

    /// A cluster membership stand-in for [`Daemon::joins_cluster`]
    pub fn cluster(&self) -> Arc<dyn Teardown> {
        self.teardown("cluster")
    }
}
