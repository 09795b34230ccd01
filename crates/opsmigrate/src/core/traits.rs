//! Core traits for system-agnostic resource migration.
//!
//! This module defines the two seams every backing system plugs into:
//!
//! - [`Connector`]: validates a [`ConnectionConfig`] and opens a [`Connection`]
//! - [`Connection`]: lists, fetches, writes and counts units on one system
//!
//! The executor and comparison engine only ever see these traits. Concrete
//! implementations live under `connectors/` and are looked up through the
//! [`ConnectorCatalog`](super::ConnectorCatalog).

use async_trait::async_trait;

use crate::config::{ConnectionConfig, SystemKind};
use crate::error::{MigrateError, Result};

use super::definition::{Definition, UnitCount, WriteOptions};
use super::unit::MigrationUnit;
use super::value::{RowBatch, RowCursor};

/// Opens connections to one family of systems.
#[async_trait]
pub trait Connector: Send + Sync {
    /// The system family this connector serves.
    fn kind(&self) -> SystemKind;

    /// Validate reachability and credentials and return a live handle.
    ///
    /// Calling this repeatedly is safe; the only side effect is the
    /// transient handle it returns. Fails with
    /// [`MigrateError::Connection`] when the system is unreachable or
    /// rejects the credentials.
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>>;
}

/// A live handle to one system instance.
///
/// One task holds exactly one source and one target connection for its
/// whole run, so implementations must tolerate many sequential calls.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Identifier used in logs and error messages.
    fn describe(&self) -> String;

    /// Unit type assumed for references without an explicit `type/` prefix.
    fn default_unit_type(&self) -> &str;

    /// Round-trip check used by connection tests.
    async fn ping(&self) -> Result<()>;

    /// Namespaces or databases, in the system's own order.
    ///
    /// Fails with [`MigrateError::Discovery`] if the system stops answering.
    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Units of the given types inside `collection`, in listing order.
    ///
    /// An existing collection with no matching units yields an empty list,
    /// never an error. An empty `unit_types` means the default unit type.
    async fn list_units(&self, collection: &str, unit_types: &[String])
        -> Result<Vec<MigrationUnit>>;

    /// Fetch the full definition of a unit.
    ///
    /// Fails with [`MigrateError::NotFound`] if the unit disappeared after
    /// it was listed.
    async fn fetch_definition(&self, unit: &MigrationUnit) -> Result<Definition>;

    /// Write a definition to `unit` on this system.
    ///
    /// Must be safe to retry: writing the same definition twice with
    /// `create_schema` set leaves the same state and does not fail.
    async fn write_definition(
        &self,
        unit: &MigrationUnit,
        definition: &Definition,
        options: &WriteOptions,
    ) -> Result<()>;

    /// Read up to `limit` rows starting at `cursor`.
    ///
    /// Systems without rows return an empty batch.
    async fn read_rows(
        &self,
        _unit: &MigrationUnit,
        _definition: &Definition,
        _cursor: &RowCursor,
        _limit: usize,
    ) -> Result<RowBatch> {
        Ok(RowBatch::empty())
    }

    /// Write a batch of rows into `unit`, returning the rows written.
    async fn write_rows(&self, unit: &MigrationUnit, _batch: RowBatch) -> Result<u64> {
        Err(MigrateError::write(
            unit,
            format!("{} does not store rows", self.describe()),
        ))
    }

    /// Existence and row/object count of a unit.
    ///
    /// An absent unit is `UnitCount { exists: false, count: 0 }`, not an error.
    async fn count_units(&self, unit: &MigrationUnit) -> Result<UnitCount>;

    /// Release the handle. Further calls are not expected.
    async fn close(&self) {}
}
