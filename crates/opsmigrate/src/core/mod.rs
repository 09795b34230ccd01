//! Core abstractions for system-agnostic migration.
//!
//! - [`unit`]: migration units, unit references and selectors
//! - [`definition`]: unit bodies, write options and counts
//! - [`value`]: row values for batched tabular copies
//! - [`traits`]: the [`Connector`] / [`Connection`] seam
//! - [`catalog`]: connector registry keyed by system kind

pub mod catalog;
pub mod definition;
pub mod traits;
pub mod unit;
pub mod value;

pub use catalog::ConnectorCatalog;
pub use definition::{Definition, TableDefinition, UnitCount, WriteOptions};
pub use traits::{Connection, Connector};
pub use unit::{MigrationUnit, PlannedUnit, ResourceSelector, UnitRef};
pub use value::{RowBatch, RowCursor, SqlValue};
