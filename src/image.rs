//! Image and layer service interface

use std::sync::Arc;

use async_trait::async_trait;

use crate::container::ContainerRecord;

/// A container's read-write layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RwLayer {
    pub mount_id: String,
}

/// Optional capability: per-container layer lookup
#[async_trait]
pub trait LayerAccessor: Send + Sync {
    async fn get_layer_by_id(&self, id: &str) -> Result<RwLayer, ImageError>;
}

#[async_trait]
pub trait ImageService: Send + Sync {
    /// Storage driver containers are created with
    fn storage_driver(&self) -> &str;

    /// Layer lookup, if this service supports it
    fn layer_accessor(&self) -> Option<Arc<dyn LayerAccessor>> {
        None
    }

    async fn get_layer_mount_id(&self, id: &str) -> Result<String, ImageError>;

    /// Mount the container's filesystem and set `base_fs`
    async fn mount(&self, record: &mut ContainerRecord) -> Result<(), ImageError>;

    async fn unmount(&self, record: &mut ContainerRecord) -> Result<(), ImageError>;

    /// Release whatever is still mounted under `mount_id`
    async fn cleanup_mounts(&self, mount_id: &str) -> Result<(), ImageError>;

    /// Shut the service down
    async fn shutdown(&self) -> Result<(), ImageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("Layer not found: {0}")]
    LayerNotFound(String),

    #[error("Mount failed for {id}: {reason}")]
    Mount { id: String, reason: String },

    #[error("Unmount failed for {id}: {reason}")]
    Unmount { id: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
