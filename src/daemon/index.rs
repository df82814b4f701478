//! Registered containers, keyed by ID

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::container::Container;

#[derive(Debug, Default)]
pub struct ContainerIndex {
    containers: RwLock<HashMap<String, Arc<Container>>>,
}

impl ContainerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a container; fails if the ID is already registered
    pub fn add(&self, container: Arc<Container>) -> Result<(), IndexError> {
        let mut containers = self.containers.write().map_err(|_| IndexError::Poisoned)?;
        if containers.contains_key(container.id()) {
            return Err(IndexError::AlreadyLoaded(container.id().to_string()));
        }
        containers.insert(container.id().to_string(), container);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<Container>> {
        self.containers.read().ok()?.get(id).cloned()
    }

    /// Snapshot of every registered container
    pub fn list(&self) -> Vec<Arc<Container>> {
        self.containers
            .read()
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.containers.read().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Container {0} is already loaded")]
    AlreadyLoaded(String),

    #[error("Container index lock poisoned")]
    Poisoned,
}
