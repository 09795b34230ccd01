//! In-process systems for tests and local experiments.
//!
//! A [`MemorySystem`] holds ordered collections of tables and objects and
//! can be told to fail specific operations. A [`MemoryConnector`] maps
//! connection configs onto registered systems: MySQL configs by `host`,
//! Kubernetes configs by `context` (or `"default"`).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::config::{ConnectionConfig, SystemKind};
use crate::core::{
    Connection, Connector, Definition, MigrationUnit, RowBatch, RowCursor, SqlValue,
    TableDefinition, UnitCount, WriteOptions,
};
use crate::error::{MigrateError, Result};

/// Called with the target unit before each definition write.
pub type WriteHook = Arc<dyn Fn(&MigrationUnit) + Send + Sync>;

#[derive(Debug, Clone)]
enum Body {
    Table {
        definition: TableDefinition,
        rows: Vec<Vec<SqlValue>>,
    },
    Object {
        manifest: serde_json::Value,
    },
}

#[derive(Debug, Clone)]
struct StoredUnit {
    unit_type: String,
    name: String,
    body: Body,
}

#[derive(Debug, Clone, Default)]
struct StoredCollection {
    name: String,
    units: Vec<StoredUnit>,
}

impl StoredCollection {
    fn find(&self, unit_type: &str, name: &str) -> Option<&StoredUnit> {
        self.units
            .iter()
            .find(|u| u.unit_type == unit_type && u.name == name)
    }

    fn find_mut(&mut self, unit_type: &str, name: &str) -> Option<&mut StoredUnit> {
        self.units
            .iter_mut()
            .find(|u| u.unit_type == unit_type && u.name == name)
    }
}

#[derive(Default)]
struct Inner {
    collections: Vec<StoredCollection>,
    failing_writes: HashSet<String>,
    fail_all_writes: Option<String>,
    failing_counts: HashSet<String>,
    offline: bool,
    write_hook: Option<WriteHook>,
    definition_writes: usize,
    row_writes: usize,
}

impl Inner {
    fn collection(&self, name: &str) -> Option<&StoredCollection> {
        self.collections.iter().find(|c| c.name == name)
    }

    fn collection_mut(&mut self, name: &str) -> Option<&mut StoredCollection> {
        self.collections.iter_mut().find(|c| c.name == name)
    }

    fn ensure_collection(&mut self, name: &str) -> &mut StoredCollection {
        if let Some(idx) = self.collections.iter().position(|c| c.name == name) {
            return &mut self.collections[idx];
        }
        self.collections.push(StoredCollection {
            name: name.to_string(),
            units: Vec::new(),
        });
        let last = self.collections.len() - 1;
        &mut self.collections[last]
    }
}

/// A shared, cloneable in-memory system.
#[derive(Clone)]
pub struct MemorySystem {
    name: String,
    inner: Arc<Mutex<Inner>>,
}

impl MemorySystem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add an empty collection.
    pub fn add_collection(&self, collection: &str) -> &Self {
        self.lock().ensure_collection(collection);
        self
    }

    /// Add a table with `row_count` generated rows (`id`, `label`).
    pub fn add_table(&self, collection: &str, table: &str, row_count: u64) -> &Self {
        let rows = (1..=row_count)
            .map(|i| {
                vec![
                    SqlValue::I64(i as i64),
                    SqlValue::Text(format!("{}-{}", table, i)),
                ]
            })
            .collect();
        let definition = TableDefinition {
            create_statement: format!(
                "CREATE TABLE `{}` (`id` bigint NOT NULL, `label` varchar(255), PRIMARY KEY (`id`))",
                table
            ),
            columns: vec!["id".to_string(), "label".to_string()],
            primary_key: vec!["id".to_string()],
            row_count,
        };
        self.insert(
            collection,
            StoredUnit {
                unit_type: "table".to_string(),
                name: table.to_string(),
                body: Body::Table { definition, rows },
            },
        );
        self
    }

    /// Add an object of `unit_type` with a minimal manifest.
    pub fn add_object(&self, collection: &str, unit_type: &str, name: &str) -> &Self {
        let manifest = serde_json::json!({
            "metadata": { "name": name, "namespace": collection },
            "kind": unit_type,
        });
        self.add_manifest(collection, unit_type, name, manifest)
    }

    pub fn add_manifest(
        &self,
        collection: &str,
        unit_type: &str,
        name: &str,
        manifest: serde_json::Value,
    ) -> &Self {
        self.insert(
            collection,
            StoredUnit {
                unit_type: unit_type.to_string(),
                name: name.to_string(),
                body: Body::Object { manifest },
            },
        );
        self
    }

    fn insert(&self, collection: &str, unit: StoredUnit) {
        let mut inner = self.lock();
        let coll = inner.ensure_collection(collection);
        coll.units
            .retain(|u| !(u.unit_type == unit.unit_type && u.name == unit.name));
        coll.units.push(unit);
    }

    /// Delete a unit, simulating a concurrent external mutation.
    pub fn remove_unit(&self, unit: &MigrationUnit) {
        let mut inner = self.lock();
        if let Some(coll) = inner.collection_mut(&unit.collection) {
            coll.units
                .retain(|u| !(u.unit_type == unit.unit_type && u.name == unit.name));
        }
    }

    /// Make definition writes to this unit fail with a permissions error.
    pub fn fail_writes_for(&self, unit: &MigrationUnit) {
        self.lock().failing_writes.insert(unit.to_string());
    }

    /// Make every write fail with `message`.
    pub fn fail_all_writes(&self, message: impl Into<String>) {
        self.lock().fail_all_writes = Some(message.into());
    }

    /// Make counting inside `collection` fail.
    pub fn fail_counts_for(&self, collection: &str) {
        self.lock().failing_counts.insert(collection.to_string());
    }

    /// Refuse new connections and fail calls on existing ones.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    pub fn set_write_hook(&self, hook: WriteHook) {
        self.lock().write_hook = Some(hook);
    }

    pub fn has_unit(&self, unit: &MigrationUnit) -> bool {
        self.lock()
            .collection(&unit.collection)
            .and_then(|c| c.find(&unit.unit_type, &unit.name))
            .is_some()
    }

    pub fn has_collection(&self, collection: &str) -> bool {
        self.lock().collection(collection).is_some()
    }

    /// Rows stored in a table, or `None` if the table is absent.
    pub fn rows(&self, unit: &MigrationUnit) -> Option<Vec<Vec<SqlValue>>> {
        self.lock()
            .collection(&unit.collection)
            .and_then(|c| c.find(&unit.unit_type, &unit.name))
            .and_then(|u| match &u.body {
                Body::Table { rows, .. } => Some(rows.clone()),
                Body::Object { .. } => None,
            })
    }

    pub fn manifest(&self, unit: &MigrationUnit) -> Option<serde_json::Value> {
        self.lock()
            .collection(&unit.collection)
            .and_then(|c| c.find(&unit.unit_type, &unit.name))
            .and_then(|u| match &u.body {
                Body::Object { manifest } => Some(manifest.clone()),
                Body::Table { .. } => None,
            })
    }

    /// Number of definition writes received so far.
    pub fn definition_writes(&self) -> usize {
        self.lock().definition_writes
    }

    /// Number of row batches received so far.
    pub fn row_writes(&self) -> usize {
        self.lock().row_writes
    }
}

/// Connector resolving configs to registered [`MemorySystem`]s.
pub struct MemoryConnector {
    kind: SystemKind,
    systems: HashMap<String, MemorySystem>,
}

impl MemoryConnector {
    pub fn new(kind: SystemKind) -> Self {
        Self {
            kind,
            systems: HashMap::new(),
        }
    }

    /// Register `system` under `key` (MySQL host or Kubernetes context).
    pub fn with_system(mut self, key: impl Into<String>, system: MemorySystem) -> Self {
        self.systems.insert(key.into(), system);
        self
    }

    fn key(config: &ConnectionConfig) -> String {
        match config {
            ConnectionConfig::Mysql(m) => m.host.clone(),
            ConnectionConfig::Kubernetes(k) => {
                k.context.clone().unwrap_or_else(|| "default".to_string())
            }
        }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn kind(&self) -> SystemKind {
        self.kind
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let key = Self::key(config);
        let system = self
            .systems
            .get(&key)
            .cloned()
            .ok_or_else(|| MigrateError::connection(&key, "no such host"))?;
        if system.lock().offline {
            return Err(MigrateError::connection(&key, "connection refused"));
        }
        let default_unit_type = match self.kind {
            SystemKind::Mysql => "table",
            SystemKind::Kubernetes => "deployments",
        };
        Ok(Box::new(MemoryConnection {
            system,
            default_unit_type,
        }))
    }
}

struct MemoryConnection {
    system: MemorySystem,
    default_unit_type: &'static str,
}

impl MemoryConnection {
    fn check_online(&self) -> Result<MutexGuard<'_, Inner>> {
        let inner = self.system.lock();
        if inner.offline {
            return Err(MigrateError::connection(self.system.name(), "connection lost"));
        }
        Ok(inner)
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn describe(&self) -> String {
        format!("memory:{}", self.system.name())
    }

    fn default_unit_type(&self) -> &str {
        self.default_unit_type
    }

    async fn ping(&self) -> Result<()> {
        self.check_online().map(|_| ())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let inner = self
            .check_online()
            .map_err(|e| MigrateError::discovery("*", e))?;
        Ok(inner.collections.iter().map(|c| c.name.clone()).collect())
    }

    async fn list_units(
        &self,
        collection: &str,
        unit_types: &[String],
    ) -> Result<Vec<MigrationUnit>> {
        let inner = self
            .check_online()
            .map_err(|e| MigrateError::discovery(collection, e))?;
        let coll = inner
            .collection(collection)
            .ok_or_else(|| MigrateError::discovery(collection, "collection does not exist"))?;

        let default_types = [self.default_unit_type.to_string()];
        let types = if unit_types.is_empty() {
            &default_types[..]
        } else {
            unit_types
        };

        let mut units = Vec::new();
        for unit_type in types {
            units.extend(
                coll.units
                    .iter()
                    .filter(|u| &u.unit_type == unit_type)
                    .map(|u| MigrationUnit::new(collection, &u.unit_type, &u.name)),
            );
        }
        Ok(units)
    }

    async fn fetch_definition(&self, unit: &MigrationUnit) -> Result<Definition> {
        let inner = self.check_online()?;
        let stored = inner
            .collection(&unit.collection)
            .and_then(|c| c.find(&unit.unit_type, &unit.name))
            .ok_or_else(|| MigrateError::NotFound(unit.to_string()))?;
        Ok(match &stored.body {
            Body::Table { definition, rows } => Definition::Table(TableDefinition {
                row_count: rows.len() as u64,
                ..definition.clone()
            }),
            Body::Object { manifest } => Definition::Manifest {
                manifest: manifest.clone(),
            },
        })
    }

    async fn write_definition(
        &self,
        unit: &MigrationUnit,
        definition: &Definition,
        options: &WriteOptions,
    ) -> Result<()> {
        let hook = self.system.lock().write_hook.clone();
        if let Some(hook) = hook {
            hook(unit);
        }

        let mut inner = self.check_online()?;
        inner.definition_writes += 1;
        if let Some(message) = &inner.fail_all_writes {
            return Err(MigrateError::write(unit, message));
        }
        if inner.failing_writes.contains(&unit.to_string()) {
            return Err(MigrateError::write(unit, "forbidden: permission denied"));
        }

        if inner.collection(&unit.collection).is_none() {
            if !options.create_schema {
                return Err(MigrateError::write(
                    unit,
                    format!("collection {} does not exist", unit.collection),
                ));
            }
            debug!("memory: creating collection {}", unit.collection);
        }
        let coll = inner.ensure_collection(&unit.collection);

        let existing = coll
            .units
            .iter()
            .position(|u| u.unit_type == unit.unit_type && u.name == unit.name);

        match (existing, definition) {
            (Some(idx), Definition::Table(def)) => match &mut coll.units[idx].body {
                Body::Table { rows, definition } => {
                    if options.truncate_target {
                        rows.clear();
                    }
                    *definition = TableDefinition {
                        row_count: rows.len() as u64,
                        ..def.clone()
                    };
                }
                Body::Object { .. } => {
                    return Err(MigrateError::write(unit, "existing unit is not a table"))
                }
            },
            (Some(idx), Definition::Manifest { manifest }) => {
                coll.units[idx].body = Body::Object {
                    manifest: manifest.clone(),
                };
            }
            (None, Definition::Table(def)) => {
                if !options.create_schema {
                    return Err(MigrateError::write(
                        unit,
                        "target table does not exist and create_schema is false",
                    ));
                }
                coll.units.push(StoredUnit {
                    unit_type: unit.unit_type.clone(),
                    name: unit.name.clone(),
                    body: Body::Table {
                        definition: TableDefinition {
                            row_count: 0,
                            ..def.clone()
                        },
                        rows: Vec::new(),
                    },
                });
            }
            (None, Definition::Manifest { manifest }) => {
                coll.units.push(StoredUnit {
                    unit_type: unit.unit_type.clone(),
                    name: unit.name.clone(),
                    body: Body::Object {
                        manifest: manifest.clone(),
                    },
                });
            }
        }
        Ok(())
    }

    async fn read_rows(
        &self,
        unit: &MigrationUnit,
        _definition: &Definition,
        cursor: &RowCursor,
        limit: usize,
    ) -> Result<RowBatch> {
        let inner = self.check_online()?;
        let stored = inner
            .collection(&unit.collection)
            .and_then(|c| c.find(&unit.unit_type, &unit.name))
            .ok_or_else(|| MigrateError::NotFound(unit.to_string()))?;
        match &stored.body {
            Body::Table { definition, rows } => {
                // Stored rows keep insertion order, so positions are stable.
                let start = (cursor.offset as usize).min(rows.len());
                let end = start.saturating_add(limit).min(rows.len());
                Ok(
                    RowBatch::new(definition.columns.clone(), rows[start..end].to_vec())
                        .with_primary_key(definition.primary_key.clone()),
                )
            }
            Body::Object { .. } => Ok(RowBatch::empty()),
        }
    }

    async fn write_rows(&self, unit: &MigrationUnit, batch: RowBatch) -> Result<u64> {
        let mut inner = self.check_online()?;
        inner.row_writes += 1;
        if let Some(message) = &inner.fail_all_writes {
            return Err(MigrateError::write(unit, message));
        }
        let stored = inner
            .collection_mut(&unit.collection)
            .and_then(|c| c.find_mut(&unit.unit_type, &unit.name))
            .ok_or_else(|| MigrateError::write(unit, "table does not exist"))?;
        let Body::Table { definition, rows } = &mut stored.body else {
            return Err(MigrateError::write(unit, "unit is not a table"));
        };

        let key_idx: Vec<usize> = definition
            .primary_key
            .iter()
            .filter_map(|pk| batch.columns.iter().position(|c| c == pk))
            .collect();

        let written = batch.rows.len() as u64;
        for row in batch.rows {
            let existing = if key_idx.is_empty() {
                None
            } else {
                rows.iter()
                    .position(|r| key_idx.iter().all(|&i| r.get(i) == row.get(i)))
            };
            match existing {
                Some(pos) => rows[pos] = row,
                None => rows.push(row),
            }
        }
        definition.row_count = rows.len() as u64;
        Ok(written)
    }

    async fn count_units(&self, unit: &MigrationUnit) -> Result<UnitCount> {
        let inner = self
            .check_online()
            .map_err(|e| MigrateError::discovery(&unit.collection, e))?;
        if inner.failing_counts.contains(&unit.collection) {
            return Err(MigrateError::discovery(&unit.collection, "count query failed"));
        }
        let count = match inner
            .collection(&unit.collection)
            .and_then(|c| c.find(&unit.unit_type, &unit.name))
        {
            None => UnitCount::absent(),
            Some(StoredUnit {
                body: Body::Table { rows, .. },
                ..
            }) => UnitCount::present(rows.len() as u64),
            Some(_) => UnitCount::present(1),
        };
        Ok(count)
    }
}
