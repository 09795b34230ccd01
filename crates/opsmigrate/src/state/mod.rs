//! Migration task records and their persistence.
//!
//! A [`MigrationTask`] is the aggregate root of one migration request. Its
//! status moves `pending -> running -> {completed, failed, cancelled}` and
//! terminal states are never left again. Outcomes are append-only and
//! progress never decreases within a run.

pub mod backend;
pub mod file;
pub mod noop;

pub use backend::TaskStore;
pub use file::JsonFileTaskStore;
pub use noop::NoOpTaskStore;

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{ConnectionConfig, MigrationDefaults};
use crate::core::{MigrationUnit, PlannedUnit, ResourceSelector, WriteOptions};
use crate::error::{MigrateError, Result};

/// Lines kept in a task's own log.
pub const TASK_LOG_CAPACITY: usize = 200;

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(MigrateError::Config(format!("Invalid task status: {}", s))),
        }
    }
}

/// Copy options for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyOptions {
    /// Rows per batch for tabular units.
    pub batch_size: usize,
    pub create_schema: bool,
    pub truncate_target: bool,
    pub only_sync_schema: bool,
}

impl CopyOptions {
    /// Options taken from the service defaults, copying rows.
    pub fn from_defaults(defaults: &MigrationDefaults) -> Self {
        Self {
            batch_size: defaults.batch_size,
            create_schema: defaults.create_schema,
            truncate_target: defaults.truncate_target,
            only_sync_schema: false,
        }
    }

    pub fn write_options(&self) -> WriteOptions {
        WriteOptions {
            create_schema: self.create_schema,
            truncate_target: self.truncate_target,
            only_sync_schema: self.only_sync_schema,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(MigrateError::Config("batch_size must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self::from_defaults(&MigrationDefaults::default())
    }
}

/// Result of copying one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOutcome {
    pub unit: MigrationUnit,
    pub target: MigrationUnit,
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Rows copied (tables only).
    #[serde(default)]
    pub rows_migrated: u64,

    pub finished_at: DateTime<Utc>,
}

impl UnitOutcome {
    pub fn succeeded(planned: &PlannedUnit, rows_migrated: u64) -> Self {
        Self {
            unit: planned.source.clone(),
            target: planned.target.clone(),
            success: true,
            error: None,
            rows_migrated,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(planned: &PlannedUnit, error: impl Into<String>, rows_migrated: u64) -> Self {
        Self {
            unit: planned.source.clone(),
            target: planned.target.clone(),
            success: false,
            error: Some(error.into()),
            rows_migrated,
            finished_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One line of a task's own log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLogEntry {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// A migration task record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationTask {
    pub id: String,
    pub source: ConnectionConfig,
    pub target: ConnectionConfig,
    pub selectors: Vec<ResourceSelector>,
    pub options: CopyOptions,
    pub status: TaskStatus,

    /// 0.0 to 100.0, non-decreasing while running.
    pub progress: f64,

    #[serde(default)]
    pub error_message: Option<String>,

    /// Units resolved when the run started, in copy order.
    #[serde(default)]
    pub units: Vec<PlannedUnit>,

    /// One entry per attempted unit, in the same order as `units`.
    #[serde(default)]
    pub outcomes: Vec<UnitOutcome>,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,

    /// Source rows of all tabular units seen so far.
    #[serde(default)]
    pub rows_total: u64,

    #[serde(default)]
    pub rows_migrated: u64,

    #[serde(default)]
    pub current_unit: Option<String>,

    #[serde(default)]
    pub log: VecDeque<TaskLogEntry>,
}

impl MigrationTask {
    /// Create a pending task with a fresh id.
    pub fn new(
        source: ConnectionConfig,
        target: ConnectionConfig,
        selectors: Vec<ResourceSelector>,
        options: CopyOptions,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source,
            target,
            selectors,
            options,
            status: TaskStatus::Pending,
            progress: 0.0,
            error_message: None,
            units: Vec::new(),
            outcomes: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            rows_total: 0,
            rows_migrated: 0,
            current_unit: None,
            log: VecDeque::new(),
        }
    }

    fn ensure_not_terminal(&self, action: &str) -> Result<()> {
        if self.status.is_terminal() {
            return Err(MigrateError::InvalidState(format!(
                "cannot {} task {}: already {}",
                action, self.id, self.status
            )));
        }
        Ok(())
    }

    /// `pending -> running`.
    pub fn mark_running(&mut self) -> Result<()> {
        if self.status != TaskStatus::Pending {
            return Err(MigrateError::InvalidState(format!(
                "task {} is {}, only pending tasks can be started",
                self.id, self.status
            )));
        }
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
        self.push_log(LogLevel::Info, "task started");
        Ok(())
    }

    /// Record the units the run will copy.
    pub fn set_units(&mut self, units: Vec<PlannedUnit>) {
        self.units = units;
        self.outcomes.clear();
        self.progress = 0.0;
    }

    /// Append the outcome of one unit and advance progress.
    pub fn record_outcome(&mut self, outcome: UnitOutcome) -> Result<()> {
        self.ensure_not_terminal("record outcome for")?;
        if self.outcomes.len() >= self.units.len() {
            return Err(MigrateError::InvalidState(format!(
                "task {} already has an outcome for every unit",
                self.id
            )));
        }
        self.outcomes.push(outcome);
        self.current_unit = None;

        let processed = self.outcomes.len() as f64;
        let total = self.units.len() as f64;
        let progress = (processed / total * 100.0).min(100.0);
        if progress > self.progress {
            self.progress = progress;
        }
        Ok(())
    }

    pub fn succeeded_units(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed_units(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.success).count()
    }

    /// Finish a run: `completed` if at least one unit succeeded, else `failed`.
    pub fn finish(&mut self) -> Result<()> {
        self.ensure_not_terminal("finish")?;
        let failed = self.failed_units();
        if self.succeeded_units() == 0 {
            let message = format!("all {} units failed", failed);
            self.push_log(LogLevel::Error, &message);
            self.status = TaskStatus::Failed;
            self.error_message = Some(message);
        } else {
            self.status = TaskStatus::Completed;
            self.progress = 100.0;
            let message = format!(
                "completed: {} succeeded, {} failed",
                self.succeeded_units(),
                failed
            );
            self.push_log(LogLevel::Info, &message);
        }
        self.current_unit = None;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Task-level failure.
    pub fn mark_failed(&mut self, message: impl Into<String>) -> Result<()> {
        self.ensure_not_terminal("fail")?;
        let message = message.into();
        self.push_log(LogLevel::Error, &message);
        self.status = TaskStatus::Failed;
        self.error_message = Some(message);
        self.current_unit = None;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_cancelled(&mut self) -> Result<()> {
        self.ensure_not_terminal("cancel")?;
        self.push_log(
            LogLevel::Warn,
            &format!("cancelled after {} of {} units", self.outcomes.len(), self.units.len()),
        );
        self.status = TaskStatus::Cancelled;
        self.current_unit = None;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Append to the bounded task log, dropping the oldest line when full.
    pub fn push_log(&mut self, level: LogLevel, message: &str) {
        if self.log.len() >= TASK_LOG_CAPACITY {
            self.log.pop_front();
        }
        self.log.push_back(TaskLogEntry {
            at: Utc::now(),
            level,
            message: message.to_string(),
        });
    }

    pub fn progress_view(&self) -> TaskProgress {
        TaskProgress {
            status: self.status,
            progress: self.progress,
            error_message: self.error_message.clone(),
            units_total: self.units.len(),
            units_processed: self.outcomes.len(),
            current_unit: self.current_unit.clone(),
        }
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            source: self.source.endpoint(),
            target: self.target.endpoint(),
            collections: self.selectors.iter().map(|s| s.collection.clone()).collect(),
            units_total: self.units.len(),
            units_succeeded: self.succeeded_units(),
            units_failed: self.failed_units(),
            error_message: self.error_message.clone(),
            created_at: self.created_at,
            finished_at: self.finished_at,
        }
    }

    /// Full record with connection secrets replaced by endpoints.
    pub fn detail(&self) -> TaskDetail {
        TaskDetail {
            summary: self.summary(),
            selectors: self.selectors.clone(),
            options: self.options,
            units: self.units.clone(),
            outcomes: self.outcomes.clone(),
            started_at: self.started_at,
            rows_total: self.rows_total,
            rows_migrated: self.rows_migrated,
            current_unit: self.current_unit.clone(),
            log: self.log.iter().cloned().collect(),
        }
    }
}

/// Pollable progress of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub status: TaskStatus,
    pub progress: f64,
    pub error_message: Option<String>,
    pub units_total: usize,
    pub units_processed: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_unit: Option<String>,
}

/// One row of the task list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: String,
    pub status: TaskStatus,
    pub progress: f64,
    pub source: String,
    pub target: String,
    pub collections: Vec<String>,
    pub units_total: usize,
    pub units_succeeded: usize,
    pub units_failed: usize,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Everything known about a task, safe to hand to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDetail {
    #[serde(flatten)]
    pub summary: TaskSummary,
    pub selectors: Vec<ResourceSelector>,
    pub options: CopyOptions,
    pub units: Vec<PlannedUnit>,
    pub outcomes: Vec<UnitOutcome>,
    pub started_at: Option<DateTime<Utc>>,
    pub rows_total: u64,
    pub rows_migrated: u64,
    pub current_unit: Option<String>,
    pub log: Vec<TaskLogEntry>,
}
