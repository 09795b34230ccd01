//! Connector catalog for explicit dependency injection.
//!
//! The [`ConnectorCatalog`] maps each [`SystemKind`] to the connector that
//! serves it. It is constructed explicitly and handed to the service, so
//! tests can swap in in-memory connectors without global state.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{ConnectionConfig, SystemKind};
use crate::connectors::{KubernetesConnector, MysqlConnector};
use crate::error::{MigrateError, Result};

use super::traits::{Connection, Connector};

/// Registry of connectors keyed by system kind.
///
/// # Example
///
/// ```rust,ignore
/// let mut catalog = ConnectorCatalog::new();
/// catalog.register(Arc::new(MysqlConnector::new()));
/// let conn = catalog.connect(&config).await?;
/// ```
#[derive(Default, Clone)]
pub struct ConnectorCatalog {
    connectors: HashMap<SystemKind, Arc<dyn Connector>>,
}

impl ConnectorCatalog {
    /// Create a new empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog with the Kubernetes and MySQL connectors registered.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register(Arc::new(KubernetesConnector::new()));
        catalog.register(Arc::new(MysqlConnector::new()));
        catalog
    }

    /// Register a connector, replacing any previous one of the same kind.
    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        self.connectors.insert(connector.kind(), connector);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, connector: Arc<dyn Connector>) -> Self {
        self.register(connector);
        self
    }

    /// Look up the connector for a kind.
    pub fn get(&self, kind: SystemKind) -> Result<Arc<dyn Connector>> {
        self.connectors.get(&kind).cloned().ok_or_else(|| {
            MigrateError::Config(format!("no connector registered for {}", kind))
        })
    }

    pub fn supports(&self, kind: SystemKind) -> bool {
        self.connectors.contains_key(&kind)
    }

    /// Resolve the connector for `config` and open a connection.
    pub async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        self.get(config.kind())?.connect(config).await
    }
}
