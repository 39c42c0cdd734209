//! Availability operations wired to a metadata store.
//!
//! [`Engine`] exposes:
//! - [`Engine::reconcile_availability`]: apply one source's report with a
//!   compare-and-swap on `checked_at`
//! - [`Engine::get_merged_availability`]: the blended per-location view
//! - [`Engine::iterate_locations`] and [`Engine::export_locations`]: keyset
//!   batches with a resumable cursor
//! - [`Engine::plan_duplicate_merges`], [`Engine::commit_merge`] and
//!   [`Engine::merge_duplicates`]: duplicate location consolidation

pub mod availability;
pub mod dedup;
pub mod error;
pub mod export;
pub mod reconcile;
pub mod reporter;
pub mod state;

pub use dedup::{MergeFailure, MergeOptions, MergeReport};
pub use error::{EngineError, EngineResult};
pub use export::{BatchOptions, ExportOutcome, LocationBatch};
pub use reconcile::{LocationRef, ReconcileAction, ReconcileOutcome};
pub use reporter::{ErrorReporter, TracingReporter};
pub use state::Engine;
