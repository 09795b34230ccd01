//! # opsmigrate
//!
//! Resource migration between Kubernetes clusters and between MySQL servers.
//!
//! Given a source system, a target system and a set of selectors, the
//! engine copies each selected unit (a Kubernetes object or a database
//! table) independently and records a per-unit outcome:
//!
//! - **Connectors** for Kubernetes (`kube`) and MySQL (`mysql_async`) behind one trait
//! - **Selector resolution** in deterministic source order
//! - **Batched row copies** with idempotent upserts
//! - **Comparison** of unit counts on both sides, divergent units first
//! - **Task tracking** with cancellation, progress polling and JSON persistence
//! - **HTTP boundary** built on `axum`
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use opsmigrate::{ConnectorCatalog, CreateTaskRequest, MigrationService, ResourceSelector, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> opsmigrate::Result<()> {
//!     let config = ServiceConfig::load("config.yaml")?;
//!     let service = MigrationService::from_config(&config, ConnectorCatalog::with_builtins()).await?;
//!     let request = CreateTaskRequest::new(
//!         "prod-db",
//!         "staging-db",
//!         vec![ResourceSelector::units("shop", ["users", "orders"])],
//!     );
//!     let id = service.create_task(request).await?;
//!     service.start_task(&id).await?;
//!     let progress = service.wait(&id).await?;
//!     println!("{}: {}%", progress.status, progress.progress);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod compare;
pub mod config;
pub mod connectors;
pub mod core;
pub mod error;
pub mod executor;
pub mod selector;
pub mod service;
pub mod state;

// Re-exports for convenient access
pub use compare::{ComparisonRequest, ComparisonResult, UnitComparison};
pub use config::{ConnectionConfig, KubernetesConfig, MysqlConfig, ServiceConfig, SystemKind};
pub use crate::core::{
    Connection, Connector, ConnectorCatalog, Definition, MigrationUnit, PlannedUnit,
    ResourceSelector, RowCursor, WriteOptions,
};
pub use error::{MigrateError, Result};
pub use executor::Executor;
pub use service::{CompareRequest, ConnectionRef, CreateTaskRequest, MigrationService};
pub use state::{CopyOptions, MigrationTask, TaskProgress, TaskStatus, TaskSummary};
