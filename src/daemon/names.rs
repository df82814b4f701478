//! Reserved-name index
//!
//! Container names and link aliases share one namespace. A name can be held
//! by exactly one container ID; reserving it again for the same ID is a no-op.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct NameIndex {
    names: Mutex<HashMap<String, String>>,
}

impl NameIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `name` for container `id`
    pub fn reserve(&self, name: &str, id: &str) -> Result<(), NameError> {
        if name.is_empty() || name == "/" {
            return Err(NameError::Invalid(name.to_string()));
        }

        let mut names = self.names.lock().map_err(|_| NameError::Poisoned)?;
        match names.get(name) {
            Some(owner) if owner == id => Ok(()),
            Some(owner) => Err(NameError::Reserved {
                name: name.to_string(),
                owner: owner.clone(),
            }),
            None => {
                names.insert(name.to_string(), id.to_string());
                Ok(())
            }
        }
    }

    pub fn release(&self, name: &str) {
        if let Ok(mut names) = self.names.lock() {
            names.remove(name);
        }
    }

    /// ID holding `name`
    pub fn get(&self, name: &str) -> Option<String> {
        self.names.lock().ok()?.get(name).cloned()
    }
}

/// Normalize a container name to its reserved form (leading `/`)
pub fn normalize_name(name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{}", name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NameError {
    #[error("Name {name} is already reserved by {owner}")]
    Reserved { name: String, owner: String },

    #[error("Invalid name: {0:?}")]
    Invalid(String),

    #[error("Name index lock poisoned")]
    Poisoned,
}
