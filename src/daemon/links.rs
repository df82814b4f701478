//! Link graph between containers
//!
//! A link `(parent, child, alias)` means the child reaches the parent under
//! `alias`, so the parent has to be up before the child starts. The graph
//! only records edges; alias uniqueness is enforced by the name index.

use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct LinkGraph {
    /// child -> alias -> parent
    edges: HashMap<String, HashMap<String, String>>,
    /// parent -> children linking to it
    reverse: HashMap<String, HashSet<String>>,
}

impl LinkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `child` reaches `parent` as `alias`
    pub fn link(&mut self, parent: &str, child: &str, alias: &str) {
        let previous = self
            .edges
            .entry(child.to_string())
            .or_default()
            .insert(alias.to_string(), parent.to_string());

        if let Some(old) = previous.filter(|old| old != parent) {
            // The child may still reach the old parent through another alias
            let still_linked = self.edges[child].values().any(|p| *p == old);
            if !still_linked {
                if let Some(children) = self.reverse.get_mut(&old) {
                    children.remove(child);
                    if children.is_empty() {
                        self.reverse.remove(&old);
                    }
                }
            }
        }

        self.reverse
            .entry(parent.to_string())
            .or_default()
            .insert(child.to_string());
    }

    /// Containers `child` links to
    pub fn parents(&self, child: &str) -> Vec<String> {
        let mut parents: Vec<String> = self
            .edges
            .get(child)
            .into_iter()
            .flat_map(|aliases| aliases.values().cloned())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        parents.sort();
        parents
    }

    /// Containers linking to `parent`
    pub fn children(&self, parent: &str) -> Vec<String> {
        let mut children: Vec<String> = self
            .reverse
            .get(parent)
            .into_iter()
            .flat_map(|c| c.iter().cloned())
            .collect();
        children.sort();
        children
    }
}
