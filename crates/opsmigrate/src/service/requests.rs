//! Request and response bodies shared by the HTTP boundary and the CLI.

use serde::{Deserialize, Serialize};

use crate::compare::ComparisonRequest;
use crate::config::{ConnectionConfig, MigrationDefaults};
use crate::core::ResourceSelector;
use crate::state::CopyOptions;

/// A connection given inline or by its configured name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConnectionRef {
    Named(String),
    Inline(ConnectionConfig),
}

impl From<ConnectionConfig> for ConnectionRef {
    fn from(config: ConnectionConfig) -> Self {
        ConnectionRef::Inline(config)
    }
}

impl From<&str> for ConnectionRef {
    fn from(name: &str) -> Self {
        ConnectionRef::Named(name.to_string())
    }
}

/// Body of `POST /migrate/tasks`. Unset copy options take service defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub source_config: ConnectionRef,
    pub target_config: ConnectionRef,
    pub selectors: Vec<ResourceSelector>,

    #[serde(default)]
    pub batch_size: Option<usize>,

    #[serde(default)]
    pub create_schema: Option<bool>,

    #[serde(default)]
    pub truncate_target: Option<bool>,

    #[serde(default)]
    pub only_sync_schema: bool,
}

impl CreateTaskRequest {
    pub fn new(
        source: impl Into<ConnectionRef>,
        target: impl Into<ConnectionRef>,
        selectors: Vec<ResourceSelector>,
    ) -> Self {
        Self {
            source_config: source.into(),
            target_config: target.into(),
            selectors,
            batch_size: None,
            create_schema: None,
            truncate_target: None,
            only_sync_schema: false,
        }
    }

    pub fn copy_options(&self, defaults: &MigrationDefaults) -> CopyOptions {
        CopyOptions {
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            create_schema: self.create_schema.unwrap_or(defaults.create_schema),
            truncate_target: self.truncate_target.unwrap_or(defaults.truncate_target),
            only_sync_schema: self.only_sync_schema,
        }
    }
}

/// Body of `POST /migrate/compare`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareRequest {
    pub source_config: ConnectionRef,
    pub target_config: ConnectionRef,
    pub collection: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_collection: Option<String>,

    pub units: Vec<String>,
}

impl CompareRequest {
    pub fn comparison(&self) -> ComparisonRequest {
        ComparisonRequest {
            collection: self.collection.clone(),
            target_collection: self.target_collection.clone(),
            units: self.units.clone(),
        }
    }
}

/// Body of `POST /migrate/compare/batch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareBatchRequest {
    pub source_config: ConnectionRef,
    pub target_config: ConnectionRef,
    pub collections: Vec<ComparisonRequest>,
}

/// Result of `POST /connections/test`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTest {
    pub ok: bool,
    pub message: String,
}

impl ConnectionTest {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn failed(err: impl std::fmt::Display) -> Self {
        Self {
            ok: false,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_defaults() {
        let body = r#"{
            "source_config": "prod-db",
            "target_config": {"type": "mysql", "host": "db2", "user": "app"},
            "selectors": [{"collection": "shop", "units": ["users", "orders"]}],
            "batch_size": 10
        }"#;
        let request: CreateTaskRequest = serde_json::from_str(body).unwrap();
        assert_eq!(request.source_config, ConnectionRef::Named("prod-db".into()));
        assert!(matches!(request.target_config, ConnectionRef::Inline(ConnectionConfig::Mysql(_))));
        assert_eq!(request.selectors[0].units, vec!["users", "orders"]);

        let options = request.copy_options(&MigrationDefaults::default());
        assert_eq!(options.batch_size, 10);
        assert!(options.create_schema);
        assert!(!options.truncate_target);
        assert!(!options.only_sync_schema);
    }
}
