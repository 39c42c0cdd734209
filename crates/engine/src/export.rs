//! Keyset batch iteration over locations and the time-budgeted export built
//! on top of it.
//!
//! Batches are ordered by `(created_at, id)` and each one starts strictly
//! after the previous batch's last row, so no row is emitted twice. Rows
//! inserted behind an already issued cursor are not seen.

use crate::error::{EngineError, EngineResult};
use crate::state::Engine;
use futures::{Stream, TryStreamExt, stream};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use univaf_core::{ExternalId, Location, LocationCursor};
use univaf_metadata::LocationFilter;
use univaf_metadata::models::LocationRow;
use univaf_metadata::repos::{ExternalIdRepo, LocationRepo};
use uuid::Uuid;

/// Parameters for [`Engine::iterate_locations`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    pub filter: LocationFilter,
    /// Rows per batch. Must be positive.
    pub batch_size: u32,
    /// Total rows across all batches; 0 means no limit.
    pub limit: u64,
    /// Resume after this position.
    pub cursor: Option<LocationCursor>,
}

impl BatchOptions {
    pub fn new(batch_size: u32) -> Self {
        Self {
            filter: LocationFilter::default(),
            batch_size,
            limit: 0,
            cursor: None,
        }
    }
}

/// One page of locations.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationBatch {
    pub rows: Vec<Location>,
    /// Where the next batch starts; `None` once the rows are exhausted.
    pub next_cursor: Option<LocationCursor>,
}

/// Result of [`Engine::export_locations`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportOutcome {
    pub exported: u64,
    /// Set when rows may remain: pass it back to continue.
    pub resume_cursor: Option<LocationCursor>,
    pub timed_out: bool,
}

struct BatchState {
    engine: Engine,
    filter: LocationFilter,
    batch_size: u32,
    remaining: Option<u64>,
    cursor: Option<LocationCursor>,
    done: bool,
}

impl Engine {
    /// Lazily page through locations matching `options.filter`.
    pub fn iterate_locations(
        &self,
        options: BatchOptions,
    ) -> EngineResult<impl Stream<Item = EngineResult<LocationBatch>> + Send + 'static> {
        if options.batch_size == 0 {
            return Err(EngineError::Value(
                "batch size must be greater than 0".to_string(),
            ));
        }

        let state = BatchState {
            engine: self.clone(),
            filter: options.filter,
            batch_size: options.batch_size,
            remaining: (options.limit > 0).then_some(options.limit),
            cursor: options.cursor,
            done: false,
        };
        Ok(stream::try_unfold(state, next_batch))
    }

    /// Stream locations into `sink` until they run out or `time_budget`
    /// elapses. Running out of time is not an error: the outcome carries the
    /// cursor to resume from.
    pub async fn export_locations<F>(
        &self,
        options: BatchOptions,
        time_budget: Duration,
        mut sink: F,
    ) -> EngineResult<ExportOutcome>
    where
        F: FnMut(&Location) -> EngineResult<()>,
    {
        let deadline = Instant::now() + time_budget;
        let batches = self.iterate_locations(options)?;
        let mut batches = std::pin::pin!(batches);

        let mut outcome = ExportOutcome::default();
        while let Some(batch) = batches.try_next().await? {
            for location in &batch.rows {
                sink(location)?;
                outcome.exported += 1;
            }
            outcome.resume_cursor = batch.next_cursor;

            if batch.next_cursor.is_some() && Instant::now() >= deadline {
                tracing::info!(
                    exported = outcome.exported,
                    "Export time budget elapsed; returning resume cursor"
                );
                outcome.timed_out = true;
                break;
            }
        }
        Ok(outcome)
    }

    /// Convert rows to locations, loading their external ids in one query.
    pub(crate) async fn attach_external_ids(
        &self,
        rows: Vec<LocationRow>,
    ) -> EngineResult<Vec<Location>> {
        let location_ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut ids_by_location: HashMap<Uuid, Vec<ExternalId>> = HashMap::new();
        for row in self.metadata.list_external_ids_for(&location_ids).await? {
            ids_by_location
                .entry(row.location_id)
                .or_default()
                .push(row.external_id());
        }

        rows.into_iter()
            .map(|row| {
                let ids = ids_by_location.remove(&row.id).unwrap_or_default();
                row.into_location(ids).map_err(EngineError::from)
            })
            .collect()
    }
}

async fn next_batch(mut state: BatchState) -> EngineResult<Option<(LocationBatch, BatchState)>> {
    if state.done {
        return Ok(None);
    }
    let requested = match state.remaining {
        Some(0) => return Ok(None),
        Some(remaining) => remaining.min(u64::from(state.batch_size)) as u32,
        None => state.batch_size,
    };

    let rows = state
        .engine
        .metadata
        .list_locations_after(&state.filter, state.cursor.as_ref(), requested)
        .await?;
    if rows.is_empty() {
        return Ok(None);
    }

    let returned = rows.len() as u64;
    let rows = state.engine.attach_external_ids(rows).await?;
    let exhausted = returned < u64::from(requested);
    let next_cursor = if exhausted {
        None
    } else {
        rows.last().map(|l| LocationCursor::new(l.created_at, l.id))
    };

    if let Some(remaining) = state.remaining.as_mut() {
        *remaining = remaining.saturating_sub(returned);
    }
    state.cursor = next_cursor;
    state.done = exhausted || state.remaining == Some(0);

    Ok(Some((LocationBatch { rows, next_cursor }, state)))
}
