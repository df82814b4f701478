//! Container loading
//!
//! Reads every entry of the container repository into a record. A record
//! that fails to decode, or that was created by another storage driver, is
//! dropped with a log line; it never stops the others from loading.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use crate::container::ContainerRecord;
use crate::image::LayerAccessor;
use crate::persist::Store;

use super::{DaemonError, Services, WorkerPool};

/// List container IDs (directory names) in the repository
pub(super) async fn read_repository(repository: &Path) -> Result<Vec<String>, DaemonError> {
    let io_err = |source: std::io::Error| DaemonError::Io {
        path: repository.to_path_buf(),
        source,
    };

    let mut entries = match tokio::fs::read_dir(repository).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::info!("Container repository {} does not exist yet", repository.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(io_err(e)),
    };

    let mut ids = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        if let Some(name) = entry.file_name().to_str() {
            ids.push(name.to_string());
        } else {
            log::warn!("Skipping non UTF-8 entry in {}", repository.display());
        }
    }
    ids.sort();
    Ok(ids)
}

/// Loads container records for one restore
///
/// The layer accessor capability is looked up once, when the loader is built.
#[derive(Clone)]
pub struct ContainerLoader {
    store: Arc<dyn Store>,
    layers: Option<Arc<dyn LayerAccessor>>,
    driver: String,
}

impl ContainerLoader {
    pub fn new(services: &Services) -> Self {
        Self {
            store: Arc::clone(&services.store),
            layers: services.image.layer_accessor(),
            driver: services.image.storage_driver().to_string(),
        }
    }

    /// Load a single record, or `None` if it has to be skipped
    pub async fn load(&self, id: &str) -> Option<ContainerRecord> {
        let mut record = match self.store.load(id).await {
            Ok(record) => record,
            Err(e) => {
                log::error!("Failed to load container {}: {}", id, e);
                return None;
            }
        };

        if record.driver != self.driver {
            log::debug!(
                "Not restoring container {} because it was created with another \
                 storage driver ({})",
                id,
                record.driver
            );
            return None;
        }

        if let Some(layers) = &self.layers {
            match layers.get_layer_by_id(id).await {
                Ok(layer) => record.rw_layer = Some(layer),
                Err(e) => log::error!("Failed to load container mount for {}: {}", id, e),
            }
        }

        log::debug!(
            "Loaded container {} (running: {}, paused: {})",
            id,
            record.state.is_running(),
            record.state.is_paused()
        );
        Some(record)
    }

    /// Load every ID on the pool, keyed by container ID
    pub async fn load_all(
        &self,
        pool: &WorkerPool,
        ids: Vec<String>,
    ) -> HashMap<String, ContainerRecord> {
        let loaded = Arc::new(Mutex::new(HashMap::new()));

        pool.run(ids, |id| {
            let loader = self.clone();
            let loaded = Arc::clone(&loaded);
            async move {
                if let Some(record) = loader.load(&id).await {
                    loaded
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(record.id.clone(), record);
                }
            }
        })
        .await;

        let records = std::mem::take(&mut *loaded.lock().unwrap_or_else(PoisonError::into_inner));
        records
    }
}
