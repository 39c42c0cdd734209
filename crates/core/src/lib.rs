//! Core domain types and shared logic for the vaccine availability service.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Locations and their external identifiers
//! - Availability reports, normalization and stored records
//! - The merged cross-source availability view
//! - Keyset pagination cursors
//! - Duplicate location detection and merge planning

pub mod availability;
pub mod config;
pub mod cursor;
pub mod dedup;
pub mod error;
pub mod location;
pub mod merge;
pub mod timestamp;

pub use availability::{
    Availability, AvailabilityLogEntry, AvailabilityRecord, AvailabilityReport, AvailabilityValues,
    CapacityBucket, Meta, NormalizedReport, Slot,
};
pub use cursor::LocationCursor;
pub use dedup::{ClusterConflict, LocationUpdate, MergePlan, PlanSet};
pub use error::{Error, Result};
pub use location::{ExternalId, Location, Position};
pub use merge::{FRESHNESS_WINDOW, MergedAvailability, merge_availability};
