//! # Deployment descriptor.
//!
//! [`Deployment`] is the immutable input the supervisor is constructed
//! with: the application config, a fresh deployment id, and the
//! component-to-group partition. The supervisor never mutates it; the
//! `same_process`/`sections`/`single_process` knobs are forwarded opaquely
//! to every worker it spawns.
//!
//! # Example
//! ```
//! use appvisor::{AppConfig, Deployment};
//!
//! let dep = Deployment::new(AppConfig {
//!     name: "collatz".to_string(),
//!     ..AppConfig::default()
//! });
//!
//! assert_eq!(dep.app.name, "collatz");
//! assert!(!dep.single_process);
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Application-level configuration, forwarded to every worker.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name.
    pub name: String,
    /// Opaque per-section config blobs, keyed by section name.
    pub sections: BTreeMap<String, String>,
    /// Run all components in the same OS process.
    pub same_process: bool,
}

/// One deployment of an application: the unit the supervisor manages.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Deployment {
    /// The application being deployed.
    pub app: AppConfig,
    /// Fresh id minted per deployment; no state survives it.
    pub id: Uuid,
    /// Partition of components into named co-location groups.
    pub components_to_groups: BTreeMap<String, String>,
    /// Collapse the whole application into a single worker process.
    pub single_process: bool,
}

impl Deployment {
    /// Creates a deployment of `app` with a fresh id and an empty
    /// partition.
    pub fn new(app: AppConfig) -> Self {
        Self {
            app,
            id: Uuid::new_v4(),
            components_to_groups: BTreeMap::new(),
            single_process: false,
        }
    }

    /// The co-location group a component is partitioned into, if any.
    pub fn group_of(&self, component: &str) -> Option<&str> {
        self.components_to_groups.get(component).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_per_deployment() {
        let a = Deployment::new(AppConfig::default());
        let b = Deployment::new(AppConfig::default());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn group_lookup() {
        let mut dep = Deployment::new(AppConfig::default());
        dep.components_to_groups
            .insert("pkg.Cache".to_string(), "cache-group".to_string());
        assert_eq!(dep.group_of("pkg.Cache"), Some("cache-group"));
        assert_eq!(dep.group_of("pkg.Frontend"), None);
    }
}
