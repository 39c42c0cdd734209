//! Blending per-source availability records into one published view.

use crate::availability::{Availability, AvailabilityRecord, CapacityBucket, Meta, Slot};
use serde::Serialize;
use std::cmp::Ordering;
use time::{Duration, OffsetDateTime};

/// Records whose `valid_at` is more than this far behind the freshest record
/// are left out of the merged view.
pub const FRESHNESS_WINDOW: Duration = Duration::hours(48);

/// The single availability published for a location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedAvailability {
    /// Sources that contributed, in priority order.
    pub sources: Vec<String>,
    pub available: Availability,
    pub available_count: Option<i64>,
    pub products: Option<Vec<String>>,
    pub doses: Option<Vec<String>>,
    pub capacity: Option<Vec<CapacityBucket>>,
    pub slots: Option<Vec<Slot>>,
    pub meta: Option<Meta>,
    #[serde(with = "time::serde::rfc3339")]
    pub valid_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub changed_at: OffsetDateTime,
}

fn by_recency(a: &&AvailabilityRecord, b: &&AvailabilityRecord) -> Ordering {
    b.valid_at
        .cmp(&a.valid_at)
        .then_with(|| b.checked_at.cmp(&a.checked_at))
        .then_with(|| a.source.cmp(&b.source))
}

/// Merge the records of one location across sources.
///
/// Records are ranked newest first, except that records with UNKNOWN
/// availability always rank below records that know the answer. Walking that
/// ranking, each field takes the first non-null value it meets. Returns
/// `None` when there are no records.
pub fn merge_availability(records: &[AvailabilityRecord]) -> Option<MergedAvailability> {
    let base = records.iter().map(|r| r.valid_at).max()?;

    let mut fresh: Vec<&AvailabilityRecord> = records
        .iter()
        .filter(|r| base - r.valid_at <= FRESHNESS_WINDOW)
        .collect();
    fresh.sort_by(by_recency);

    let (known, unknown): (Vec<_>, Vec<_>) = fresh
        .into_iter()
        .partition(|r| r.values.available.is_known());
    let ranked: Vec<&AvailabilityRecord> = known.into_iter().chain(unknown).collect();

    // `ranked` is never empty: the record holding `base` always survives.
    let first = ranked.first()?;
    let mut merged = MergedAvailability {
        sources: Vec::with_capacity(ranked.len()),
        available: Availability::Unknown,
        available_count: None,
        products: None,
        doses: None,
        capacity: None,
        slots: None,
        meta: None,
        valid_at: first.valid_at,
        checked_at: first.checked_at,
        changed_at: first.changed_at,
    };

    for record in &ranked {
        let values = &record.values;
        if !merged.available.is_known() {
            merged.available = values.available;
        }
        merged.available_count = merged.available_count.or(values.available_count);
        if merged.products.is_none() {
            merged.products = values.products.clone();
        }
        if merged.doses.is_none() {
            merged.doses = values.doses.clone();
        }
        if merged.capacity.is_none() {
            merged.capacity = values.capacity.clone();
        }
        if merged.slots.is_none() {
            merged.slots = values.slots.clone();
        }
        if merged.meta.is_none() {
            merged.meta = values.meta.clone();
        }
        merged.sources.push(record.source.clone());
    }

    // A NO from a higher-priority source beats a stale count from a lower one.
    if merged.available == Availability::No && merged.available_count.is_some_and(|n| n > 0) {
        merged.available_count = Some(0);
    }

    Some(merged)
}
