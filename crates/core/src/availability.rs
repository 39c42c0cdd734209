//! Availability reports, stored records and the derivation rules that turn a
//! partially filled report into a complete record.

use crate::error::{Error, Result};
use crate::timestamp;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

/// Free-form metadata attached to records and locations.
pub type Meta = Map<String, Value>;

/// Tri-state availability flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Availability {
    Yes,
    No,
    #[default]
    Unknown,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "YES",
            Self::No => "NO",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Whether this is an actual answer (YES or NO).
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Availability implied by a count: any positive count means YES.
    pub fn from_count(count: i64) -> Self {
        if count > 0 { Self::Yes } else { Self::No }
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Availability {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "YES" => Ok(Self::Yes),
            "NO" => Ok(Self::No),
            "UNKNOWN" => Ok(Self::Unknown),
            other => Err(Error::value(format!("unknown availability '{other}'"))),
        }
    }
}

/// Availability for one date, optionally narrowed to a product set and dose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityBucket {
    pub date: Date,
    #[serde(default)]
    pub available: Availability,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unavailable_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub products: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dose: Option<String>,
}

/// A single bookable appointment time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub end: Option<OffsetDateTime>,
    #[serde(default)]
    pub available: Availability,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unavailable_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub products: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dose: Option<String>,
}

/// One source's availability report for a location, as received.
///
/// Everything except `source` and `checked_at` is optional; missing values are
/// filled in by [`AvailabilityReport::normalize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityReport {
    pub source: String,
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub valid_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available: Option<Availability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub products: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doses: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<Vec<CapacityBucket>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slots: Option<Vec<Slot>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
}

/// The fields whose change advances `changed_at`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityValues {
    pub available: Availability,
    pub available_count: Option<i64>,
    pub products: Option<Vec<String>>,
    pub doses: Option<Vec<String>>,
    pub capacity: Option<Vec<CapacityBucket>>,
    pub slots: Option<Vec<Slot>>,
    pub meta: Option<Meta>,
}

/// A validated report with every derived field filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedReport {
    pub source: String,
    pub checked_at: OffsetDateTime,
    pub valid_at: OffsetDateTime,
    pub is_public: bool,
    pub values: AvailabilityValues,
}

/// Current availability of one location according to one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityRecord {
    pub location_id: Uuid,
    pub source: String,
    #[serde(flatten)]
    pub values: AvailabilityValues,
    #[serde(with = "time::serde::rfc3339")]
    pub valid_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub changed_at: OffsetDateTime,
    pub is_public: bool,
}

/// One accepted reconcile call, as kept in the availability history.
///
/// Entries for calls that changed nothing are compact: they carry only the
/// new `checked_at`, plus `valid_at` when the report was newer but identical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityLogEntry {
    pub location_id: Uuid,
    pub source: String,
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub valid_at: Option<OffsetDateTime>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub changed_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<AvailabilityValues>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
}

impl AvailabilityLogEntry {
    /// Whether this entry records a change of values.
    pub fn is_change(&self) -> bool {
        self.changed_at.is_some()
    }
}

impl AvailabilityReport {
    /// Create a report with only the required fields set.
    pub fn new(source: impl Into<String>, checked_at: OffsetDateTime) -> Self {
        Self {
            source: source.into(),
            checked_at,
            valid_at: None,
            available: None,
            available_count: None,
            products: None,
            doses: None,
            capacity: None,
            slots: None,
            meta: None,
            is_public: None,
        }
    }

    /// Reject malformed reports before anything is derived from them.
    pub fn validate(&self) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(Error::value("source must not be empty"));
        }
        check_count("available_count", self.available_count)?;

        for bucket in self.capacity.iter().flatten() {
            check_count("capacity.available_count", bucket.available_count)?;
            check_count("capacity.unavailable_count", bucket.unavailable_count)?;
        }

        for slot in self.slots.iter().flatten() {
            check_count("slots.available_count", slot.available_count)?;
            check_count("slots.unavailable_count", slot.unavailable_count)?;
            if let Some(end) = slot.end
                && end < slot.start
            {
                return Err(Error::value(format!(
                    "slot ends ({end}) before it starts ({})",
                    slot.start
                )));
            }
        }
        Ok(())
    }

    /// Validate and fill in every derivable field.
    ///
    /// - `valid_at` defaults to `checked_at`.
    /// - `capacity` is built from `slots` when absent.
    /// - `available_count`, `products` and `doses` are aggregated from
    ///   `capacity` when absent.
    /// - `available` is implied by `available_count` when absent, otherwise
    ///   it is UNKNOWN.
    pub fn normalize(self) -> Result<NormalizedReport> {
        self.validate()?;

        let checked_at = timestamp::normalize(self.checked_at);
        let valid_at = self
            .valid_at
            .map(timestamp::normalize)
            .unwrap_or(checked_at);

        let capacity = match (self.capacity, &self.slots) {
            (Some(capacity), _) => Some(capacity),
            (None, Some(slots)) => Some(capacity_from_slots(slots)),
            (None, None) => None,
        };

        let summary = capacity
            .as_deref()
            .map(summarize_capacity)
            .unwrap_or_default();

        let available_count = self.available_count.or(summary.available_count);
        let available = match (self.available, available_count) {
            (Some(available), _) => available,
            (None, Some(count)) => Availability::from_count(count),
            (None, None) => Availability::Unknown,
        };

        Ok(NormalizedReport {
            source: self.source.trim().to_string(),
            checked_at,
            valid_at,
            is_public: self.is_public.unwrap_or(true),
            values: AvailabilityValues {
                available,
                available_count,
                products: self.products.or(summary.products),
                doses: self.doses.or(summary.doses),
                capacity,
                slots: self.slots,
                meta: self.meta,
            },
        })
    }
}

fn check_count(field: &str, count: Option<i64>) -> Result<()> {
    match count {
        Some(n) if n < 0 => Err(Error::value(format!("{field} must not be negative: {n}"))),
        _ => Ok(()),
    }
}

/// Aggregates derived from a list of capacity buckets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapacitySummary {
    /// Sum of bucket counts, or `None` if no bucket carries a count.
    pub available_count: Option<i64>,
    pub products: Option<Vec<String>>,
    pub doses: Option<Vec<String>>,
}

/// Sum counts and union the products/doses of capacity buckets.
pub fn summarize_capacity(capacity: &[CapacityBucket]) -> CapacitySummary {
    let mut count = None;
    let mut products = BTreeSet::new();
    let mut doses = BTreeSet::new();

    for bucket in capacity {
        if let Some(n) = bucket.available_count {
            count = Some(count.unwrap_or(0) + n);
        }
        products.extend(bucket.products.iter().flatten().cloned());
        doses.extend(bucket.dose.iter().cloned());
    }

    CapacitySummary {
        available_count: count,
        products: (!products.is_empty()).then(|| products.into_iter().collect()),
        doses: (!doses.is_empty()).then(|| doses.into_iter().collect()),
    }
}

type BucketKey = (Date, Option<Vec<String>>, Option<String>);

/// Bucket slots by (date, product set, dose), ordered by date.
///
/// The date is the calendar date of the slot's start in its own offset.
pub fn capacity_from_slots(slots: &[Slot]) -> Vec<CapacityBucket> {
    let mut buckets: BTreeMap<BucketKey, CapacityBucket> = BTreeMap::new();

    for slot in slots {
        let products = slot.products.as_ref().map(|p| {
            let set: BTreeSet<&String> = p.iter().collect();
            set.into_iter().cloned().collect::<Vec<_>>()
        });
        let key = (slot.start.date(), products, slot.dose.clone());

        let bucket = buckets
            .entry(key.clone())
            .or_insert_with(|| CapacityBucket {
                date: key.0,
                available: Availability::Unknown,
                available_count: Some(0),
                unavailable_count: Some(0),
                products: key.1.clone(),
                dose: key.2.clone(),
            });

        let (available, unavailable) = match slot.available {
            Availability::Yes => (
                slot.available_count.unwrap_or(1),
                slot.unavailable_count.unwrap_or(0),
            ),
            Availability::No => (
                slot.available_count.unwrap_or(0),
                slot.unavailable_count.unwrap_or(1),
            ),
            Availability::Unknown => (
                slot.available_count.unwrap_or(0),
                slot.unavailable_count.unwrap_or(0),
            ),
        };
        bucket.available_count = Some(bucket.available_count.unwrap_or(0) + available);
        bucket.unavailable_count = Some(bucket.unavailable_count.unwrap_or(0) + unavailable);
    }

    buckets
        .into_values()
        .map(|mut bucket| {
            let available = bucket.available_count.unwrap_or(0);
            let unavailable = bucket.unavailable_count.unwrap_or(0);
            bucket.available = if available > 0 {
                Availability::Yes
            } else if unavailable > 0 {
                Availability::No
            } else {
                Availability::Unknown
            };
            bucket
        })
        .collect()
}
