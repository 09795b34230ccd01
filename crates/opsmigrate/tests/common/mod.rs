//! Shared fixtures: a service wired to in-memory source and target systems.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use opsmigrate::config::MigrationDefaults;
use opsmigrate::connectors::{MemoryConnector, MemorySystem};
use opsmigrate::state::{NoOpTaskStore, TaskStore};
use opsmigrate::{
    ConnectionConfig, ConnectorCatalog, KubernetesConfig, MigrationService, MysqlConfig,
    SystemKind,
};

pub const KUBECONFIG: &str = "apiVersion: v1\nkind: Config\n";

pub fn mysql(host: &str) -> ConnectionConfig {
    ConnectionConfig::mysql(MysqlConfig::new(host, "root")).unwrap()
}

pub fn kubernetes(context: &str) -> ConnectionConfig {
    ConnectionConfig::kubernetes(KubernetesConfig {
        kubeconfig: KUBECONFIG.to_string(),
        context: Some(context.to_string()),
    })
    .unwrap()
}

/// Source and target systems of one kind behind a running service.
pub struct Harness {
    pub service: Arc<MigrationService>,
    pub src: MemorySystem,
    pub dst: MemorySystem,
    pub source: ConnectionConfig,
    pub target: ConnectionConfig,
}

impl Harness {
    pub fn mysql() -> Self {
        Self::build(SystemKind::Mysql, Arc::new(NoOpTaskStore::new()))
    }

    pub fn kubernetes() -> Self {
        Self::build(SystemKind::Kubernetes, Arc::new(NoOpTaskStore::new()))
    }

    pub fn with_store(kind: SystemKind, store: Arc<dyn TaskStore>) -> Self {
        Self::build(kind, store)
    }

    fn build(kind: SystemKind, store: Arc<dyn TaskStore>) -> Self {
        let src = MemorySystem::new("src");
        let dst = MemorySystem::new("dst");
        let catalog = ConnectorCatalog::new().with(Arc::new(
            MemoryConnector::new(kind)
                .with_system("src", src.clone())
                .with_system("dst", dst.clone()),
        ));
        let (source, target) = match kind {
            SystemKind::Mysql => (mysql("src"), mysql("dst")),
            SystemKind::Kubernetes => (kubernetes("src"), kubernetes("dst")),
        };

        let mut connections = BTreeMap::new();
        connections.insert("src".to_string(), source.clone());
        connections.insert("dst".to_string(), target.clone());

        let service = MigrationService::new(Arc::new(catalog), store, MigrationDefaults::default())
            .with_connections(connections);

        Self {
            service: Arc::new(service),
            src,
            dst,
            source,
            target,
        }
    }
}
