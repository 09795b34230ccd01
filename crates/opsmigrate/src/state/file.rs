//! JSON file task store.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{MigrateError, Result};
use crate::state::backend::TaskStore;
use crate::state::MigrationTask;

/// Stores each task as `<dir>/<task id>.json`.
///
/// Writes go to a temporary file that is then renamed over the record, so
/// a crash mid-write leaves the previous version intact.
pub struct JsonFileTaskStore {
    dir: PathBuf,
}

impl JsonFileTaskStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }
}

#[async_trait]
impl TaskStore for JsonFileTaskStore {
    async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            MigrateError::State(format!("cannot create {}: {}", self.dir.display(), e))
        })
    }

    async fn save(&self, task: &MigrationTask) -> Result<()> {
        let content = serde_json::to_string_pretty(task)?;
        let path = self.path_for(&task.id);
        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, content).await?;
        tokio::fs::rename(&temp_path, &path).await?;
        debug!("Saved task {} to {}", task.id, path.display());
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<MigrationTask>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut tasks = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<MigrationTask>(&content) {
                Ok(task) => tasks.push(task),
                Err(e) => warn!("Skipping unreadable task record {}: {}", path.display(), e),
            }
        }
        Ok(tasks)
    }

    fn store_type(&self) -> &'static str {
        "json-file"
    }
}
