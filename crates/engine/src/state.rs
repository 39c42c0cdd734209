//! Engine state shared across operations.

use crate::error::{EngineError, EngineResult};
use crate::reporter::{ErrorReporter, TracingReporter};
use std::future::Future;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use univaf_core::config::AppConfig;
use univaf_metadata::MetadataStore;

/// Entry point for every operation. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Where background failures go.
    pub reporter: Arc<dyn ErrorReporter>,
    background: TaskTracker,
}

impl Engine {
    pub fn new(config: AppConfig, metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            config: Arc::new(config),
            metadata,
            reporter: Arc::new(TracingReporter),
            background: TaskTracker::new(),
        }
    }

    /// Validate the configuration and connect to the configured store.
    pub async fn from_config(config: AppConfig) -> EngineResult<Self> {
        config.validate().map_err(EngineError::Value)?;
        let metadata = univaf_metadata::from_config(&config.metadata).await?;
        Ok(Self::new(config, metadata))
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Run `task` without waiting for it. Its outcome never reaches the caller.
    pub(crate) fn spawn_background<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.background.spawn(task);
    }

    /// Wait for every background task spawned so far.
    pub async fn flush(&self) {
        self.background.close();
        self.background.wait().await;
        self.background.reopen();
    }
}
