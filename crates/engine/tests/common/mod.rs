//! Common engine test utilities and fixtures.

use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use time::OffsetDateTime;
use univaf_core::config::AppConfig;
use univaf_core::{Availability, AvailabilityReport, ExternalId, Location};
use univaf_engine::{Engine, EngineError, ErrorReporter};
use univaf_metadata::models::LocationRow;
use univaf_metadata::repos::{ExternalIdRepo, LocationRepo};
use univaf_metadata::{MetadataStore, SqliteStore};
use uuid::Uuid;

/// An engine over a temp-dir SQLite store that cleans up on drop.
#[allow(dead_code)]
pub struct TestEngine {
    pub engine: Engine,
    pub sqlite_store: Arc<SqliteStore>,
    pub reporter: Arc<RecordingReporter>,
    _temp_dir: TempDir,
}

impl TestEngine {
    pub async fn new() -> Self {
        Self::with_config(AppConfig::default()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let store = Arc::new(
            SqliteStore::new(temp_dir.path().join("test.db"), None)
                .await
                .expect("Failed to open SQLite store"),
        );
        let reporter = Arc::new(RecordingReporter::default());
        let engine = Engine::new(config, store.clone() as Arc<dyn MetadataStore>)
            .with_reporter(reporter.clone());
        Self {
            engine,
            sqlite_store: store,
            reporter,
            _temp_dir: temp_dir,
        }
    }

    /// Insert a location directly, bypassing the reconciler.
    #[allow(dead_code)]
    pub async fn insert_location(
        &self,
        created_at: OffsetDateTime,
        ids: &[(&str, &str)],
        customize: impl FnOnce(&mut Location),
    ) -> Location {
        let mut location = Location::new(Uuid::new_v4(), "test", created_at);
        customize(&mut location);
        let metadata = &self.engine.metadata;
        metadata
            .create_location(&LocationRow::from_location(&location).unwrap())
            .await
            .unwrap();

        let ids: Vec<ExternalId> = ids.iter().map(|(s, v)| ExternalId::new(*s, *v)).collect();
        metadata
            .add_external_ids(location.id, &ids, created_at)
            .await
            .unwrap();
        location.external_ids = ids;
        location
    }
}

/// Keeps every reported background failure.
#[derive(Default)]
pub struct RecordingReporter {
    pub reports: Mutex<Vec<(String, String)>>,
}

#[allow(dead_code)]
impl RecordingReporter {
    pub fn reports(&self) -> Vec<(String, String)> {
        self.reports.lock().unwrap().clone()
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, context: &'static str, error: &EngineError) {
        self.reports
            .lock()
            .unwrap()
            .push((context.to_string(), error.code().to_string()));
    }
}

/// A report with `available` and optional count set.
#[allow(dead_code)]
pub fn report(
    source: &str,
    checked_at: OffsetDateTime,
    available: Availability,
    count: Option<i64>,
) -> AvailabilityReport {
    let mut report = AvailabilityReport::new(source, checked_at);
    report.available = Some(available);
    report.available_count = count;
    report
}
