//! Task store trait.
//!
//! The service works with `Arc<dyn TaskStore>` and never knows where task
//! records end up:
//!
//! - [`JsonFileTaskStore`](super::JsonFileTaskStore): one JSON file per task
//! - [`NoOpTaskStore`](super::NoOpTaskStore): nothing persisted

use async_trait::async_trait;

use super::MigrationTask;
use crate::error::Result;

/// Persistence backend for task records.
///
/// Implementations must be `Send + Sync`; one store is shared by every
/// running task.
///
/// # Example
///
/// ```rust,ignore
/// let store: Arc<dyn TaskStore> = Arc::new(JsonFileTaskStore::new("/var/lib/opsmigrate"));
/// store.init().await?;
/// store.save(&task).await?;
/// let tasks = store.load_all().await?;
/// ```
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Prepare the storage location. Safe to call more than once.
    async fn init(&self) -> Result<()>;

    /// Persist the full record, replacing any previous version.
    async fn save(&self, task: &MigrationTask) -> Result<()>;

    /// Every stored record, in no particular order.
    async fn load_all(&self) -> Result<Vec<MigrationTask>>;

    /// Backend name for logging.
    fn store_type(&self) -> &'static str;
}
