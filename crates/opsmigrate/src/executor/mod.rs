//! Migration executor.
//!
//! Runs one task: connects both systems once, resolves the selectors
//! against the source, then copies every unit in resolved order. A unit
//! that fails is recorded and the run moves on. Connecting, resolving and
//! losing a connection mid-run fail the task as a whole; a lost connection
//! is still recorded against the unit it interrupted.
//!
//! Cancellation is cooperative. The token is checked before every unit and
//! between row batches of a tabular unit.

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::core::{Connection, ConnectorCatalog, Definition, PlannedUnit, RowCursor};
use crate::error::{MigrateError, Result};
use crate::selector;
use crate::state::{CopyOptions, LogLevel, MigrationTask, TaskStatus, TaskStore, UnitOutcome};

/// A task record shared between its worker and pollers.
pub type SharedTask = Arc<RwLock<MigrationTask>>;

/// Everything one run needs besides the task itself.
struct RunContext<'a> {
    source: &'a dyn Connection,
    target: &'a dyn Connection,
    options: CopyOptions,
    task: &'a SharedTask,
    cancel: &'a CancellationToken,
}

/// Executes migration tasks against connectors from a catalog.
#[derive(Clone)]
pub struct Executor {
    catalog: Arc<ConnectorCatalog>,
    store: Arc<dyn TaskStore>,
}

impl Executor {
    pub fn new(catalog: Arc<ConnectorCatalog>, store: Arc<dyn TaskStore>) -> Self {
        Self { catalog, store }
    }

    /// Run a task that is already `running` until it reaches a terminal state.
    ///
    /// Returns the terminal status. Task-level failures are recorded on the
    /// task, not returned.
    #[instrument(skip_all, fields(task_id))]
    pub async fn run(&self, task: SharedTask, cancel: CancellationToken) -> TaskStatus {
        let (id, source_config, target_config, selectors, options) = {
            let t = task.read().await;
            (
                t.id.clone(),
                t.source.clone(),
                t.target.clone(),
                t.selectors.clone(),
                t.options,
            )
        };
        tracing::Span::current().record("task_id", id.as_str());

        info!(
            "Starting task {}: {} -> {}",
            id,
            source_config.endpoint(),
            target_config.endpoint()
        );

        let source = match self.catalog.connect(&source_config).await {
            Ok(c) => c,
            Err(e) => return self.fail(&task, &e).await,
        };
        let target = match self.catalog.connect(&target_config).await {
            Ok(c) => c,
            Err(e) => {
                source.close().await;
                return self.fail(&task, &e).await;
            }
        };

        let ctx = RunContext {
            source: source.as_ref(),
            target: target.as_ref(),
            options,
            task: &task,
            cancel: &cancel,
        };
        let status = self.execute(&ctx, &selectors).await;

        source.close().await;
        target.close().await;
        status
    }

    async fn execute(
        &self,
        ctx: &RunContext<'_>,
        selectors: &[crate::core::ResourceSelector],
    ) -> TaskStatus {
        let planned = match selector::resolve(ctx.source, selectors).await {
            Ok(p) => p,
            Err(e) => return self.fail(ctx.task, &e).await,
        };

        {
            let mut t = ctx.task.write().await;
            t.set_units(planned.clone());
            let message = format!("resolved {} units", planned.len());
            t.push_log(LogLevel::Info, &message);
            info!("Task {}: {}", t.id, message);
        }
        self.persist(ctx.task).await;

        for (idx, unit) in planned.iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                info!("Cancellation requested, stopping before {}", unit.source);
                return self.finish(ctx.task, Finish::Cancelled).await;
            }

            {
                let mut t = ctx.task.write().await;
                t.current_unit = Some(unit.source.to_string());
            }
            info!("[{}/{}] {} -> {}", idx + 1, planned.len(), unit.source, unit.target);

            let mut rows = 0u64;
            let mut fatal = None;
            let outcome = match self.copy_unit(ctx, unit, &mut rows).await {
                Ok(()) => {
                    info!("{}: migrated ({} rows)", unit.source, rows);
                    UnitOutcome::succeeded(unit, rows)
                }
                Err(e) => {
                    let outcome = UnitOutcome::failed(unit, e.to_string(), rows);
                    if e.is_unit_level() {
                        warn!("{}: failed: {}", unit.source, e);
                    } else {
                        error!("{}: failed: {}", unit.source, e);
                        fatal = Some(e);
                    }
                    outcome
                }
            };
            let interrupted = outcome.error.is_some() && ctx.cancel.is_cancelled();

            {
                let mut t = ctx.task.write().await;
                if let Some(message) = &outcome.error {
                    t.push_log(LogLevel::Warn, &format!("{}: {}", unit.source, message));
                } else {
                    t.push_log(LogLevel::Info, &format!("{}: migrated", unit.source));
                }
                if let Err(e) = t.record_outcome(outcome) {
                    error!("Task {}: {}", t.id, e);
                }
            }
            self.persist(ctx.task).await;

            if let Some(e) = fatal {
                return self.fail(ctx.task, &e).await;
            }
            if interrupted {
                info!("Cancellation requested, stopped inside {}", unit.source);
                return self.finish(ctx.task, Finish::Cancelled).await;
            }
        }

        self.finish(ctx.task, Finish::Attempted).await
    }

    /// Copy one unit; `rows` counts rows written even when the copy fails.
    async fn copy_unit(
        &self,
        ctx: &RunContext<'_>,
        unit: &PlannedUnit,
        rows: &mut u64,
    ) -> Result<()> {
        let definition = ctx.source.fetch_definition(&unit.source).await?;
        if let Definition::Table(table) = &definition {
            ctx.task.write().await.rows_total += table.row_count;
        }

        ctx.target
            .write_definition(&unit.target, &definition, &ctx.options.write_options())
            .await?;

        if !definition.is_tabular() || ctx.options.only_sync_schema {
            return Ok(());
        }

        let batch_size = ctx.options.batch_size.max(1);
        let mut cursor = RowCursor::start();
        loop {
            if !cursor.is_start() && ctx.cancel.is_cancelled() {
                return Err(MigrateError::write(
                    &unit.target,
                    format!("cancelled after {} rows", rows),
                ));
            }

            let batch = ctx
                .source
                .read_rows(&unit.source, &definition, &cursor, batch_size)
                .await?;
            let read = batch.len();
            if read == 0 {
                break;
            }
            cursor.advance(&batch);

            let written = ctx.target.write_rows(&unit.target, batch).await?;
            *rows += written;
            ctx.task.write().await.rows_migrated += written;
            debug!("{}: {} rows read, batch wrote {}", unit.target, cursor.offset, written);

            if read < batch_size {
                break;
            }
        }
        Ok(())
    }

    async fn fail(&self, task: &SharedTask, err: &MigrateError) -> TaskStatus {
        let status = {
            let mut t = task.write().await;
            error!("Task {} failed: {}", t.id, err);
            if let Err(e) = t.mark_failed(err.to_string()) {
                warn!("{}", e);
            }
            t.status
        };
        self.persist(task).await;
        status
    }

    async fn finish(&self, task: &SharedTask, how: Finish) -> TaskStatus {
        let status = {
            let mut t = task.write().await;
            let result = match how {
                Finish::Cancelled => t.mark_cancelled(),
                Finish::Attempted => t.finish(),
            };
            if let Err(e) = result {
                warn!("{}", e);
            }
            info!(
                "Task {} {}: {} succeeded, {} failed",
                t.id,
                t.status,
                t.succeeded_units(),
                t.failed_units()
            );
            t.status
        };
        self.persist(task).await;
        status
    }

    /// Save a snapshot of the task. Store failures are logged, not fatal.
    async fn persist(&self, task: &SharedTask) {
        let snapshot = task.read().await.clone();
        if let Err(e) = self.store.save(&snapshot).await {
            warn!(
                "Failed to persist task {} to {} store: {}",
                snapshot.id,
                self.store.store_type(),
                e
            );
        }
    }
}

enum Finish {
    Attempted,
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionConfig, MysqlConfig, SystemKind};
    use crate::connectors::{MemoryConnector, MemorySystem};
    use crate::core::{MigrationUnit, ResourceSelector};
    use crate::state::NoOpTaskStore;

    fn executor(src: &MemorySystem, dst: &MemorySystem) -> Executor {
        let connector = MemoryConnector::new(SystemKind::Mysql)
            .with_system("src", src.clone())
            .with_system("dst", dst.clone());
        let catalog = ConnectorCatalog::new().with(Arc::new(connector));
        Executor::new(Arc::new(catalog), Arc::new(NoOpTaskStore::new()))
    }

    fn running_task(selectors: Vec<ResourceSelector>, options: CopyOptions) -> SharedTask {
        let mut task = MigrationTask::new(
            ConnectionConfig::mysql(MysqlConfig::new("src", "root")).unwrap(),
            ConnectionConfig::mysql(MysqlConfig::new("dst", "root")).unwrap(),
            selectors,
            options,
        );
        task.mark_running().unwrap();
        Arc::new(RwLock::new(task))
    }

    #[tokio::test]
    async fn test_copies_rows_in_batches() {
        let src = MemorySystem::new("src");
        src.add_table("shop", "users", 25);
        let dst = MemorySystem::new("dst");

        let options = CopyOptions {
            batch_size: 10,
            ..CopyOptions::default()
        };
        let task = running_task(vec![ResourceSelector::types("shop", ["table"])], options);
        let status = executor(&src, &dst).run(task.clone(), CancellationToken::new()).await;

        assert_eq!(status, TaskStatus::Completed);
        let users = MigrationUnit::new("shop", "table", "users");
        assert_eq!(dst.rows(&users).unwrap().len(), 25);
        assert_eq!(dst.row_writes(), 3);

        let t = task.read().await;
        assert_eq!(t.rows_total, 25);
        assert_eq!(t.rows_migrated, 25);
        assert_eq!(t.outcomes[0].rows_migrated, 25);
    }

    #[tokio::test]
    async fn test_schema_only_skips_rows() {
        let src = MemorySystem::new("src");
        src.add_table("shop", "users", 5);
        let dst = MemorySystem::new("dst");

        let options = CopyOptions {
            only_sync_schema: true,
            ..CopyOptions::default()
        };
        let task = running_task(vec![ResourceSelector::units("shop", ["users"])], options);
        executor(&src, &dst).run(task, CancellationToken::new()).await;

        let users = MigrationUnit::new("shop", "table", "users");
        assert!(dst.has_unit(&users));
        assert_eq!(dst.rows(&users).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_missing_target_table_without_create_schema() {
        let src = MemorySystem::new("src");
        src.add_table("shop", "users", 2).add_table("shop", "orders", 2);
        let dst = MemorySystem::new("dst");
        dst.add_table("shop", "users", 0);

        let options = CopyOptions {
            create_schema: false,
            ..CopyOptions::default()
        };
        let task = running_task(vec![ResourceSelector::types("shop", ["table"])], options);
        let status = executor(&src, &dst).run(task.clone(), CancellationToken::new()).await;

        assert_eq!(status, TaskStatus::Completed);
        let t = task.read().await;
        assert!(t.outcomes[0].success);
        assert!(!t.outcomes[1].success);
        assert!(t.outcomes[1]
            .error
            .as_deref()
            .unwrap()
            .contains("create_schema is false"));
    }

    #[tokio::test]
    async fn test_unit_vanished_before_fetch_is_recorded() {
        let src = MemorySystem::new("src");
        src.add_table("shop", "users", 1).add_table("shop", "orders", 1);
        let dst = MemorySystem::new("dst");

        // Remove "orders" once "users" is being written.
        let vanishing = src.clone();
        dst.set_write_hook(Arc::new(move |unit: &MigrationUnit| {
            if unit.name == "users" {
                vanishing.remove_unit(&MigrationUnit::new("shop", "table", "orders"));
            }
        }));

        let task = running_task(
            vec![ResourceSelector::types("shop", ["table"])],
            CopyOptions::default(),
        );
        let status = executor(&src, &dst).run(task.clone(), CancellationToken::new()).await;

        assert_eq!(status, TaskStatus::Completed);
        let t = task.read().await;
        assert_eq!(t.outcomes.len(), 2);
        assert!(t.outcomes[1].error.as_deref().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_unreachable_source_fails_task() {
        let src = MemorySystem::new("src");
        src.set_offline(true);
        let dst = MemorySystem::new("dst");

        let task = running_task(
            vec![ResourceSelector::types("shop", ["table"])],
            CopyOptions::default(),
        );
        let status = executor(&src, &dst).run(task.clone(), CancellationToken::new()).await;

        assert_eq!(status, TaskStatus::Failed);
        let t = task.read().await;
        assert!(t.outcomes.is_empty());
        assert!(t.error_message.as_deref().unwrap().contains("src"));
        assert_eq!(dst.definition_writes(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_unit() {
        let src = MemorySystem::new("src");
        src.add_table("shop", "users", 1);
        let dst = MemorySystem::new("dst");

        let cancel = CancellationToken::new();
        cancel.cancel();
        let task = running_task(
            vec![ResourceSelector::types("shop", ["table"])],
            CopyOptions::default(),
        );
        let status = executor(&src, &dst).run(task.clone(), cancel).await;

        assert_eq!(status, TaskStatus::Cancelled);
        assert!(task.read().await.outcomes.is_empty());
        assert_eq!(dst.definition_writes(), 0);
    }

    #[tokio::test]
    async fn test_connection_lost_mid_run_fails_task() {
        let src = MemorySystem::new("src");
        src.add_table("shop", "users", 3)
            .add_table("shop", "orders", 3)
            .add_table("shop", "items", 3);
        let dst = MemorySystem::new("dst");

        let unplugged = dst.clone();
        dst.set_write_hook(Arc::new(move |unit: &MigrationUnit| {
            if unit.name == "orders" {
                unplugged.set_offline(true);
            }
        }));

        let task = running_task(
            vec![ResourceSelector::types("shop", ["table"])],
            CopyOptions::default(),
        );
        let status = executor(&src, &dst).run(task.clone(), CancellationToken::new()).await;

        assert_eq!(status, TaskStatus::Failed);
        let t = task.read().await;
        assert!(t.error_message.as_deref().unwrap().contains("connection lost"));
        assert_eq!(t.outcomes.len(), 2);
        assert!(t.outcomes[0].success);
        assert!(!t.outcomes[1].success);
        assert!(!dst.has_unit(&MigrationUnit::new("shop", "table", "items")));
    }

    #[tokio::test]
    async fn test_cancelled_between_batches() {
        let src = MemorySystem::new("src");
        src.add_table("shop", "users", 50).add_table("shop", "orders", 5);
        let dst = MemorySystem::new("dst");

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        dst.set_write_hook(Arc::new(move |unit: &MigrationUnit| {
            if unit.name == "users" {
                trigger.cancel();
            }
        }));

        let options = CopyOptions {
            batch_size: 10,
            ..CopyOptions::default()
        };
        let task = running_task(vec![ResourceSelector::types("shop", ["table"])], options);
        let status = executor(&src, &dst).run(task.clone(), cancel).await;

        assert_eq!(status, TaskStatus::Cancelled);
        assert_eq!(dst.row_writes(), 1);
        let users = MigrationUnit::new("shop", "table", "users");
        assert_eq!(dst.rows(&users).unwrap().len(), 10);
        assert!(!dst.has_unit(&MigrationUnit::new("shop", "table", "orders")));

        let t = task.read().await;
        assert_eq!(t.outcomes.len(), 1);
        assert!(!t.outcomes[0].success);
        assert_eq!(t.outcomes[0].rows_migrated, 10);
        assert!(t.outcomes[0]
            .error
            .as_deref()
            .unwrap()
            .contains("cancelled after 10 rows"));
    }

    #[tokio::test]
    async fn test_cancel_inside_last_unit_ends_cancelled() {
        let src = MemorySystem::new("src");
        src.add_table("shop", "users", 30);
        let dst = MemorySystem::new("dst");

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        dst.set_write_hook(Arc::new(move |_: &MigrationUnit| trigger.cancel()));

        let options = CopyOptions {
            batch_size: 10,
            ..CopyOptions::default()
        };
        let task = running_task(vec![ResourceSelector::units("shop", ["users"])], options);
        let status = executor(&src, &dst).run(task.clone(), cancel).await;

        assert_eq!(status, TaskStatus::Cancelled);
        assert_eq!(task.read().await.outcomes.len(), 1);
    }
}
