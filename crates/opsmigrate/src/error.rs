//! Error types for the migration library.

use thiserror::Error;

use crate::compare::ComparisonResult;

/// Main error type for migration operations.
///
/// Unit-level variants (`NotFound`, `Write`) are recorded into a task's
/// outcomes by the executor and never abort a run. Everything else is
/// task-level and surfaces to the caller.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// System unreachable or credentials rejected
    #[error("Connection to {system} failed: {message}")]
    Connection { system: String, message: String },

    /// Listing collections or units failed
    #[error("Discovery failed in {collection}: {message}")]
    Discovery { collection: String, message: String },

    /// Unit vanished between listing and fetch
    #[error("Unit {0} not found")]
    NotFound(String),

    /// Target write failed for a unit
    #[error("Write failed for {unit}: {message}")]
    Write { unit: String, message: String },

    /// Selectors resolved to nothing
    #[error("Selection is empty: {0}")]
    EmptySelection(String),

    /// Counting failed while comparing one collection
    #[error("Comparison failed for collection {collection}: {message}")]
    Comparison {
        collection: String,
        message: String,
        /// Units compared before the failure.
        partial: Box<ComparisonResult>,
    },

    /// Illegal task transition
    #[error("Invalid task state: {0}")]
    InvalidState(String),

    /// No task with this id
    #[error("Task {0} not found")]
    TaskNotFound(String),

    /// Task store error
    #[error("State store error: {0}")]
    State(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Operation was cancelled (SIGINT, cancel request)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Connection error for the named system
    pub fn connection(system: impl Into<String>, message: impl std::fmt::Display) -> Self {
        MigrateError::Connection {
            system: system.into(),
            message: message.to_string(),
        }
    }

    /// Create a Discovery error scoped to a collection
    pub fn discovery(collection: impl Into<String>, message: impl std::fmt::Display) -> Self {
        MigrateError::Discovery {
            collection: collection.into(),
            message: message.to_string(),
        }
    }

    /// Create a Write error for a unit
    pub fn write(unit: impl std::fmt::Display, message: impl std::fmt::Display) -> Self {
        MigrateError::Write {
            unit: unit.to_string(),
            message: message.to_string(),
        }
    }

    /// True for errors the executor records per unit instead of failing the task.
    ///
    /// A lost connection is never unit-level: every later unit would hit it too.
    pub fn is_unit_level(&self) -> bool {
        matches!(
            self,
            MigrateError::NotFound(_) | MigrateError::Write { .. } | MigrateError::Discovery { .. }
        )
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => 1,
            MigrateError::Connection { .. } => 2,
            MigrateError::Discovery { .. } | MigrateError::NotFound(_) => 3,
            MigrateError::EmptySelection(_)
            | MigrateError::InvalidState(_)
            | MigrateError::TaskNotFound(_) => 4,
            MigrateError::Comparison { .. } => 5,
            MigrateError::Cancelled => 6,
            MigrateError::Io(_) => 7,
            MigrateError::Write { .. } | MigrateError::State(_) | MigrateError::Json(_) => 8,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
