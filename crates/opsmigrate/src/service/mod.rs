//! Task registry and the operations exposed to callers.
//!
//! [`MigrationService`] owns every task record, spawns one worker per
//! started task and answers polling reads while workers run. The HTTP
//! boundary and the CLI are thin layers over it.

mod requests;

pub use requests::{
    CompareBatchRequest, CompareRequest, ConnectionRef, ConnectionTest, CreateTaskRequest,
};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::compare::{self, CollectionComparison, ComparisonResult};
use crate::config::{ConnectionConfig, MigrationDefaults, ServiceConfig};
use crate::core::{
    Connection, ConnectorCatalog, Definition, MigrationUnit, PlannedUnit, ResourceSelector, UnitRef,
};
use crate::error::{MigrateError, Result};
use crate::executor::{Executor, SharedTask};
use crate::selector;
use crate::state::{
    JsonFileTaskStore, MigrationTask, NoOpTaskStore, TaskDetail, TaskProgress, TaskStatus,
    TaskStore, TaskSummary,
};

/// Message recorded on tasks that were running when the service stopped.
pub const INTERRUPTED_MESSAGE: &str = "interrupted by service restart";

struct TaskHandle {
    task: SharedTask,
    cancel: CancellationToken,
    status: watch::Sender<TaskStatus>,
}

impl TaskHandle {
    fn new(task: MigrationTask) -> Self {
        let (status, _) = watch::channel(task.status);
        Self {
            task: Arc::new(RwLock::new(task)),
            cancel: CancellationToken::new(),
            status,
        }
    }
}

/// The migration service.
pub struct MigrationService {
    catalog: Arc<ConnectorCatalog>,
    store: Arc<dyn TaskStore>,
    executor: Executor,
    defaults: MigrationDefaults,
    connections: BTreeMap<String, ConnectionConfig>,
    tasks: RwLock<HashMap<String, Arc<TaskHandle>>>,
}

impl MigrationService {
    pub fn new(
        catalog: Arc<ConnectorCatalog>,
        store: Arc<dyn TaskStore>,
        defaults: MigrationDefaults,
    ) -> Self {
        Self {
            executor: Executor::new(catalog.clone(), store.clone()),
            catalog,
            store,
            defaults,
            connections: BTreeMap::new(),
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Make named connections available to `ConnectionRef::Named`.
    pub fn with_connections(mut self, connections: BTreeMap<String, ConnectionConfig>) -> Self {
        self.connections = connections;
        self
    }

    /// Build a service from configuration and reload persisted tasks.
    pub async fn from_config(config: &ServiceConfig, catalog: ConnectorCatalog) -> Result<Self> {
        let store: Arc<dyn TaskStore> = match &config.state.dir {
            Some(dir) => Arc::new(JsonFileTaskStore::new(dir)),
            None => Arc::new(NoOpTaskStore::new()),
        };
        store.init().await?;

        let service = Self::new(Arc::new(catalog), store, config.migration.clone())
            .with_connections(config.connections.clone());
        let restored = service.restore().await?;
        if restored > 0 {
            info!("Restored {} tasks from {} store", restored, service.store.store_type());
        }
        Ok(service)
    }

    /// Reload stored tasks. Tasks left `running` are marked failed.
    pub async fn restore(&self) -> Result<usize> {
        let stored = self.store.load_all().await?;
        let mut tasks = self.tasks.write().await;
        let mut count = 0;
        for mut task in stored {
            if task.status == TaskStatus::Running {
                warn!("Task {} was running at shutdown, marking failed", task.id);
                task.mark_failed(INTERRUPTED_MESSAGE)?;
                self.store.save(&task).await?;
            }
            tasks.insert(task.id.clone(), Arc::new(TaskHandle::new(task)));
            count += 1;
        }
        Ok(count)
    }

    pub fn defaults(&self) -> &MigrationDefaults {
        &self.defaults
    }

    pub fn catalog(&self) -> &ConnectorCatalog {
        &self.catalog
    }

    /// Names of the configured connections.
    pub fn connection_names(&self) -> Vec<String> {
        self.connections.keys().cloned().collect()
    }

    /// Look up a named connection.
    pub fn named_connection(&self, name: &str) -> Result<ConnectionConfig> {
        self.connections
            .get(name)
            .cloned()
            .ok_or_else(|| MigrateError::NotFound(format!("connection '{}'", name)))
    }

    fn resolve_ref(&self, r: &ConnectionRef) -> Result<ConnectionConfig> {
        match r {
            ConnectionRef::Named(name) => self.named_connection(name),
            ConnectionRef::Inline(config) => {
                config.validate()?;
                Ok(config.clone())
            }
        }
    }

    async fn handle(&self, id: &str) -> Result<Arc<TaskHandle>> {
        self.tasks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| MigrateError::TaskNotFound(id.to_string()))
    }

    async fn persist(&self, task: &MigrationTask) {
        if let Err(e) = self.store.save(task).await {
            warn!("Failed to persist task {}: {}", task.id, e);
        }
    }

    /// Resolve `selectors` against `source` without writing anything.
    pub async fn plan(
        &self,
        source: &ConnectionConfig,
        selectors: &[ResourceSelector],
    ) -> Result<Vec<PlannedUnit>> {
        let conn = self.catalog.connect(source).await?;
        let planned = selector::resolve(conn.as_ref(), selectors).await;
        conn.close().await;
        planned
    }

    /// Validate a request and register a `pending` task.
    ///
    /// The source is connected and the selectors resolved here so an empty
    /// selection is rejected before anything is stored. Nothing is written
    /// to the target.
    #[instrument(skip_all)]
    pub async fn create_task(&self, request: CreateTaskRequest) -> Result<String> {
        let source = self.resolve_ref(&request.source_config)?;
        let target = self.resolve_ref(&request.target_config)?;
        if !self.catalog.supports(target.kind()) {
            return Err(MigrateError::Config(format!(
                "no connector registered for {}",
                target.kind()
            )));
        }

        let options = request.copy_options(&self.defaults);
        options.validate()?;

        let planned = self.plan(&source, &request.selectors).await?;

        let task = MigrationTask::new(source, target, request.selectors, options);
        let id = task.id.clone();
        info!(
            "Created task {} ({} units at creation): {} -> {}",
            id,
            planned.len(),
            task.source.endpoint(),
            task.target.endpoint()
        );
        self.persist(&task).await;
        self.tasks
            .write()
            .await
            .insert(id.clone(), Arc::new(TaskHandle::new(task)));
        Ok(id)
    }

    /// `pending -> running`, then run the task on its own worker.
    pub async fn start_task(&self, id: &str) -> Result<TaskStatus> {
        let handle = self.handle(id).await?;
        let snapshot = {
            let mut task = handle.task.write().await;
            task.mark_running()?;
            task.clone()
        };
        self.persist(&snapshot).await;
        handle.status.send_replace(TaskStatus::Running);

        let executor = self.executor.clone();
        let worker = handle.clone();
        tokio::spawn(async move {
            let status = executor.run(worker.task.clone(), worker.cancel.clone()).await;
            worker.status.send_replace(status);
        });
        Ok(TaskStatus::Running)
    }

    /// Request cancellation.
    ///
    /// A pending task is cancelled at once. A running task stops at its next
    /// checkpoint, so the returned status is still `running`.
    pub async fn cancel_task(&self, id: &str) -> Result<TaskStatus> {
        let handle = self.handle(id).await?;
        let mut task = handle.task.write().await;
        let status = task.status;
        match status {
            TaskStatus::Pending => {
                task.mark_cancelled()?;
                let snapshot = task.clone();
                drop(task);
                self.persist(&snapshot).await;
                handle.status.send_replace(TaskStatus::Cancelled);
                Ok(TaskStatus::Cancelled)
            }
            TaskStatus::Running => {
                info!("Cancellation requested for task {}", id);
                handle.cancel.cancel();
                Ok(TaskStatus::Running)
            }
            other => Err(MigrateError::InvalidState(format!(
                "task {} is {}, nothing to cancel",
                id, other
            ))),
        }
    }

    /// Current status and progress.
    pub async fn get_progress(&self, id: &str) -> Result<TaskProgress> {
        let handle = self.handle(id).await?;
        let task = handle.task.read().await;
        Ok(task.progress_view())
    }

    /// Full record with outcomes, without connection secrets.
    pub async fn get_task(&self, id: &str) -> Result<TaskDetail> {
        let handle = self.handle(id).await?;
        let task = handle.task.read().await;
        Ok(task.detail())
    }

    /// Snapshot of the raw record, connection configs included.
    pub async fn task_record(&self, id: &str) -> Result<MigrationTask> {
        let handle = self.handle(id).await?;
        let task = handle.task.read().await;
        Ok(task.clone())
    }

    /// Task summaries, most recently created first.
    pub async fn list_tasks(&self) -> Vec<TaskSummary> {
        let handles: Vec<Arc<TaskHandle>> = self.tasks.read().await.values().cloned().collect();
        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            summaries.push(handle.task.read().await.summary());
        }
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }

    /// Wait until the task reaches a terminal state.
    ///
    /// A task that was never started is `InvalidState` rather than a wait
    /// that cannot end.
    pub async fn wait(&self, id: &str) -> Result<TaskProgress> {
        let handle = self.handle(id).await?;
        let mut rx = handle.status.subscribe();
        // Nothing drives a pending task forward.
        if handle.task.read().await.status == TaskStatus::Pending {
            return Err(MigrateError::InvalidState(format!(
                "task {} has not been started",
                id
            )));
        }
        rx.wait_for(TaskStatus::is_terminal)
            .await
            .map_err(|_| MigrateError::State(format!("worker for task {} went away", id)))?;
        drop(rx);
        self.get_progress(id).await
    }

    async fn connect_pair(
        &self,
        source: &ConnectionRef,
        target: &ConnectionRef,
    ) -> Result<(Box<dyn Connection>, Box<dyn Connection>)> {
        let source = self.catalog.connect(&self.resolve_ref(source)?).await?;
        match self.resolve_ref(target) {
            Ok(config) => match self.catalog.connect(&config).await {
                Ok(target) => Ok((source, target)),
                Err(e) => {
                    source.close().await;
                    Err(e)
                }
            },
            Err(e) => {
                source.close().await;
                Err(e)
            }
        }
    }

    /// Compare units of one collection. Has no effect on any task.
    pub async fn compare(&self, request: CompareRequest) -> Result<ComparisonResult> {
        let (source, target) = self
            .connect_pair(&request.source_config, &request.target_config)
            .await?;
        let result =
            compare::compare_collection(source.as_ref(), target.as_ref(), &request.comparison()).await;
        source.close().await;
        target.close().await;
        result
    }

    /// Compare several collections; per-collection failures are reported inline.
    pub async fn compare_batch(&self, request: CompareBatchRequest) -> Result<Vec<CollectionComparison>> {
        let (source, target) = self
            .connect_pair(&request.source_config, &request.target_config)
            .await?;
        let results =
            compare::compare_many(source.as_ref(), target.as_ref(), &request.collections).await;
        source.close().await;
        target.close().await;
        Ok(results)
    }

    /// Check a connection. Never fails; problems are reported in the result.
    pub async fn test_connection(&self, config: &ConnectionRef) -> ConnectionTest {
        let config = match self.resolve_ref(config) {
            Ok(c) => c,
            Err(e) => return ConnectionTest::failed(e),
        };
        match self.catalog.connect(&config).await {
            Ok(conn) => {
                let result = conn.ping().await;
                let described = conn.describe();
                conn.close().await;
                match result {
                    Ok(()) => ConnectionTest::ok(format!("connected to {}", described)),
                    Err(e) => ConnectionTest::failed(e),
                }
            }
            Err(e) => ConnectionTest::failed(e),
        }
    }

    pub async fn list_collections(&self, config: &ConnectionConfig) -> Result<Vec<String>> {
        let conn = self.catalog.connect(config).await?;
        let result = conn.list_collections().await;
        conn.close().await;
        result
    }

    pub async fn list_units(
        &self,
        config: &ConnectionConfig,
        collection: &str,
        unit_types: &[String],
    ) -> Result<Vec<MigrationUnit>> {
        let conn = self.catalog.connect(config).await?;
        let result = conn.list_units(collection, unit_types).await;
        conn.close().await;
        result
    }

    /// Fetch one unit's definition, e.g. to export it as YAML.
    ///
    /// `unit` is a `name` or `type/name` reference.
    pub async fn fetch_definition(
        &self,
        config: &ConnectionConfig,
        collection: &str,
        unit: &str,
    ) -> Result<Definition> {
        let unit_ref = UnitRef::parse(unit)?;
        let conn = self.catalog.connect(config).await?;
        let unit = unit_ref.into_unit(collection, conn.default_unit_type());
        let result = conn.fetch_definition(&unit).await;
        conn.close().await;
        result
    }
}
