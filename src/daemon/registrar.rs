//! Name and link registration

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::container::{Container, ContainerRecord};

use super::names::{normalize_name, NameError};
use super::{Daemon, IndexError, WorkerPool};

/// Length of the ID prefix used as a generated name
const GENERATED_NAME_LEN: usize = 12;

/// Split a `name[:alias]` link; the alias defaults to the name
pub fn parse_link(link: &str) -> Result<(String, String), LinkError> {
    let (name, alias) = link.split_once(':').unwrap_or((link, link));
    let name = name.trim_start_matches('/');
    let alias = alias.trim_start_matches('/');
    if name.is_empty() || alias.is_empty() || alias.contains(':') {
        return Err(LinkError::Invalid(link.to_string()));
    }
    Ok((name.to_string(), alias.to_string()))
}

fn generated_name(id: &str) -> String {
    let short: String = id.chars().take(GENERATED_NAME_LEN).collect();
    format!("/{}", short)
}

impl Daemon {
    /// Reserve a record's name and add it to the container index
    pub(super) fn register(
        &self,
        mut record: ContainerRecord,
    ) -> Result<Arc<Container>, RegisterError> {
        if record.id.is_empty() {
            return Err(RegisterError::MissingId);
        }

        record.name = if record.name.is_empty() {
            generated_name(&record.id)
        } else {
            normalize_name(&record.name)
        };

        self.names.reserve(&record.name, &record.id)?;

        let name = record.name.clone();
        let container = Arc::new(Container::new(record));
        if let Err(e) = self.containers.add(Arc::clone(&container)) {
            self.names.release(&name);
            return Err(e.into());
        }
        Ok(container)
    }

    /// Register every loaded record; records that fail are left out
    pub(super) async fn register_all(
        self: &Arc<Self>,
        pool: &WorkerPool,
        loaded: HashMap<String, ContainerRecord>,
    ) -> Vec<Arc<Container>> {
        let registered = Arc::new(Mutex::new(Vec::new()));

        pool.run(loaded.into_values(), |record| {
            let daemon = Arc::clone(self);
            let registered = Arc::clone(&registered);
            async move {
                let id = record.id.clone();
                let name = record.name.clone();
                match daemon.register(record) {
                    Ok(container) => registered
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(container),
                    Err(e) => log::error!("Failed to register container {} ({}): {}", id, name, e),
                }
            }
        })
        .await;

        let mut containers =
            std::mem::take(&mut *registered.lock().unwrap_or_else(PoisonError::into_inner));
        containers.sort_by(|a, b| a.id().cmp(b.id()));
        containers
    }

    /// Look a container up by name, then by ID
    pub fn lookup(&self, name_or_id: &str) -> Option<Arc<Container>> {
        self.names
            .get(&normalize_name(name_or_id))
            .and_then(|id| self.containers.get(&id))
            .or_else(|| self.containers.get(name_or_id))
    }

    /// Record that `child` reaches `parent` as `alias`
    ///
    /// The alias is reserved as `<child name>/<alias>`. Reserving it again for
    /// the same parent is a no-op.
    pub(super) fn register_link(
        &self,
        parent_id: &str,
        child_id: &str,
        child_name: &str,
        alias: &str,
    ) -> Result<(), LinkError> {
        let full_name = format!("{}/{}", child_name, alias);
        self.names.reserve(&full_name, parent_id)?;
        self.link_graph().link(parent_id, child_id, &full_name);
        Ok(())
    }

    /// Wire up the legacy links a container declares
    pub(super) async fn register_links(&self, container: &Container) -> Result<(), LinkError> {
        let (child_name, network_mode, links) = {
            let record = container.lock().await;
            (
                record.name.clone(),
                record.host_config.network_mode.clone(),
                record.host_config.links.clone(),
            )
        };

        // Links only exist on the legacy bridge
        if links.is_empty() || network_mode.is_user_defined() {
            return Ok(());
        }

        for link in &links {
            let (name, alias) = parse_link(link)?;
            let parent = self
                .lookup(&name)
                .ok_or_else(|| LinkError::NotFound(name.clone()))?;

            if parent.lock().await.host_config.network_mode.is_host() {
                return Err(LinkError::HostNetwork(name));
            }

            match self.register_link(parent.id(), container.id(), &child_name, &alias) {
                Err(LinkError::Name(e @ NameError::Reserved { .. })) => {
                    log::warn!(
                        "Error registering link for {}, to {}, as alias {}, ignoring: {}",
                        container.id(),
                        parent.id(),
                        alias,
                        e
                    );
                }
                res => res?,
            }
        }
        Ok(())
    }

    pub(super) async fn register_all_links(
        self: &Arc<Self>,
        pool: &WorkerPool,
        containers: &[Arc<Container>],
    ) {
        pool.run(containers.iter().cloned(), |container| {
            let daemon = Arc::clone(self);
            async move {
                if let Err(e) = daemon.register_links(&container).await {
                    log::error!("Failed to register link for container {}: {}", container.id(), e);
                }
            }
        })
        .await;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("Container has no ID")]
    MissingId,

    #[error("Failed to register container name: {0}")]
    Name(#[from] NameError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Invalid link: {0:?}")]
    Invalid(String),

    #[error("Could not get container for {0}")]
    NotFound(String),

    #[error("Conflicting options: host type networking can't be used with links ({0})")]
    HostNetwork(String),

    #[error(transparent)]
    Name(#[from] NameError),
}
