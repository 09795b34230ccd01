//! Unit definitions and write options.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// The full body of a unit as fetched from a source system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Definition {
    /// A Kubernetes object, already sanitized for re-creation.
    Manifest { manifest: serde_json::Value },

    /// A table: DDL plus metadata needed to page through its rows.
    Table(TableDefinition),
}

impl Definition {
    /// Whether rows are copied after the definition is written.
    pub fn is_tabular(&self) -> bool {
        matches!(self, Definition::Table(_))
    }

    /// Export the definition as YAML (manifest) or SQL (table DDL).
    pub fn to_yaml(&self) -> Result<String> {
        match self {
            Definition::Manifest { manifest } => Ok(serde_yaml::to_string(manifest)?),
            Definition::Table(t) => Ok(serde_yaml::to_string(t)?),
        }
    }
}

/// Table schema as reported by the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDefinition {
    /// `CREATE TABLE` statement for the table, unqualified.
    pub create_statement: String,

    /// Column names in ordinal order.
    pub columns: Vec<String>,

    /// Primary key columns, used to order paged reads.
    #[serde(default)]
    pub primary_key: Vec<String>,

    /// Row count at fetch time.
    pub row_count: u64,
}

/// How a definition is written to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOptions {
    /// Create the namespace/database and the unit itself when missing.
    pub create_schema: bool,

    /// Empty (tables) or replace (objects) an existing unit before writing.
    pub truncate_target: bool,

    /// Write the structure only, skip rows.
    pub only_sync_schema: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            create_schema: true,
            truncate_target: false,
            only_sync_schema: false,
        }
    }
}

/// Existence and size of one unit in one system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UnitCount {
    pub exists: bool,

    /// Rows for tables, 1 for an existing object, 0 when absent.
    pub count: u64,
}

impl UnitCount {
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn present(count: u64) -> Self {
        Self {
            exists: true,
            count,
        }
    }
}
