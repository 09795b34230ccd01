//! Task store that keeps nothing.
//!
//! Used when no state directory is configured. Task records then live only
//! in the service's memory and are gone after a restart.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::warn;

use crate::error::Result;
use crate::state::backend::TaskStore;
use crate::state::MigrationTask;

/// No-op task store. Logs a warning on first use.
pub struct NoOpTaskStore {
    warned: AtomicBool,
}

impl NoOpTaskStore {
    pub fn new() -> Self {
        Self {
            warned: AtomicBool::new(false),
        }
    }

    fn warn_once(&self) {
        if !self.warned.swap(true, Ordering::SeqCst) {
            warn!(
                "No state directory configured: task records are kept in memory only \
                 and will not survive a restart."
            );
        }
    }
}

impl Default for NoOpTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for NoOpTaskStore {
    async fn init(&self) -> Result<()> {
        self.warn_once();
        Ok(())
    }

    async fn save(&self, _task: &MigrationTask) -> Result<()> {
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<MigrationTask>> {
        Ok(Vec::new())
    }

    fn store_type(&self) -> &'static str {
        "noop"
    }
}
