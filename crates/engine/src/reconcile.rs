//! Applying one source's availability report to a location.
//!
//! Writes are guarded by a compare-and-swap on `checked_at`: a report is
//! accepted only if its watermark is strictly newer than the stored one and
//! the stored row is still the one the update was derived from. The
//! availability log entry is written in the background after the record is
//! accepted, and a failure there never fails the reconcile call.

use crate::error::{EngineError, EngineResult};
use crate::state::Engine;
use serde::Serialize;
use std::collections::HashSet;
use univaf_core::{
    AvailabilityLogEntry, AvailabilityRecord, AvailabilityReport, ExternalId, Location,
    NormalizedReport, timestamp,
};
use univaf_metadata::models::{AvailabilityLogRow, AvailabilityRow, LocationRow};
use univaf_metadata::repos::{AvailabilityLogRepo, AvailabilityRepo, ExternalIdRepo, LocationRepo};
use uuid::Uuid;

/// How a report names the location it is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationRef {
    Id(Uuid),
    /// Resolve through external ids, creating the location if none match.
    ExternalIds(Vec<ExternalId>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileAction {
    Create,
    Update,
}

/// Result of an accepted report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub action: ReconcileAction,
    pub location_id: Uuid,
}

/// What an accepted update did to the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateKind {
    /// Only the watermark moved; the report's data is not newer.
    CheckedOnly,
    /// Newer data with the same values.
    Validated,
    Changed,
}

/// A resolved location and the reported ids it still has to take on.
struct ResolvedLocation {
    id: Uuid,
    pending_ids: Vec<ExternalId>,
}

impl Engine {
    /// Apply one availability report.
    ///
    /// Fails with `OutOfDate` when `checked_at` does not advance past the
    /// stored record, leaving it and the location untouched.
    pub async fn reconcile_availability(
        &self,
        location: &LocationRef,
        report: AvailabilityReport,
    ) -> EngineResult<ReconcileOutcome> {
        let report = report.normalize()?;
        let resolved = self.resolve_location(location, &report).await?;
        let location_id = resolved.id;

        // A lost insert or a zero-row update means another writer committed
        // first; classify again against its row.
        loop {
            let Some(stored) = self
                .metadata
                .get_availability(location_id, &report.source)
                .await?
            else {
                let record = new_record(location_id, &report);
                if self
                    .metadata
                    .insert_availability(&AvailabilityRow::from_record(&record)?)
                    .await?
                {
                    tracing::debug!(
                        location_id = %location_id,
                        source = %report.source,
                        "Created availability record"
                    );
                    self.store_resolved_external_ids(&resolved).await?;
                    self.log_availability(full_entry(&record));
                    return Ok(ReconcileOutcome {
                        action: ReconcileAction::Create,
                        location_id,
                    });
                }
                continue;
            };

            let stored = stored.into_record()?;
            if stored.checked_at >= report.checked_at {
                tracing::warn!(
                    location_id = %location_id,
                    source = %report.source,
                    checked_at = %report.checked_at,
                    "Rejected availability report that is not newer than the stored record"
                );
                return Err(EngineError::OutOfDate {
                    location_id,
                    report_source: report.source,
                    checked_at: report.checked_at,
                });
            }

            let expected = stored.checked_at;
            let (kind, next) = apply_report(stored, &report);
            let updated = self
                .metadata
                .update_availability_if_newer(&AvailabilityRow::from_record(&next)?, expected)
                .await?;
            if updated == 0 {
                tracing::debug!(
                    location_id = %location_id,
                    source = %report.source,
                    "Availability record changed concurrently; classifying again"
                );
                continue;
            }

            tracing::debug!(
                location_id = %location_id,
                source = %next.source,
                kind = ?kind,
                "Updated availability record"
            );
            self.store_resolved_external_ids(&resolved).await?;
            self.log_availability(log_entry(kind, &next));

            return Ok(ReconcileOutcome {
                action: ReconcileAction::Update,
                location_id,
            });
        }
    }

    async fn resolve_location(
        &self,
        location: &LocationRef,
        report: &NormalizedReport,
    ) -> EngineResult<ResolvedLocation> {
        let ids = match location {
            LocationRef::Id(id) => {
                return match self.metadata.get_location(*id).await? {
                    Some(_) => Ok(ResolvedLocation {
                        id: *id,
                        pending_ids: Vec::new(),
                    }),
                    None => Err(EngineError::NotFound(format!("location {id}"))),
                };
            }
            LocationRef::ExternalIds(ids) => ids,
        };

        if ids.is_empty() {
            return Err(EngineError::Value(
                "a location reference needs at least one external id".to_string(),
            ));
        }

        let unique: Vec<ExternalId> = {
            let mut seen = HashSet::new();
            ids.iter().filter(|id| seen.insert(*id)).cloned().collect()
        };

        let matches = self.metadata.find_locations_by_external_ids(ids).await?;
        if let Some(found) = matches.first() {
            if matches.len() > 1 {
                // Left for the duplicate merge pass to consolidate.
                tracing::warn!(
                    location_id = %found.id,
                    candidates = matches.len(),
                    "External ids match several locations; using the oldest"
                );
            }
            return Ok(ResolvedLocation {
                id: found.id,
                pending_ids: unique,
            });
        }

        let location = Location::new(Uuid::new_v4(), &report.source, timestamp::now());
        self.metadata
            .create_location(&LocationRow::from_location(&location)?)
            .await?;
        self.metadata
            .add_external_ids(location.id, &unique, timestamp::now())
            .await?;
        tracing::info!(
            location_id = %location.id,
            provider = %location.provider,
            "Created location for unknown external ids"
        );
        Ok(ResolvedLocation {
            id: location.id,
            pending_ids: Vec::new(),
        })
    }

    /// Attach reported ids the location lacks, once its report is accepted.
    async fn store_resolved_external_ids(&self, resolved: &ResolvedLocation) -> EngineResult<()> {
        if resolved.pending_ids.is_empty() {
            return Ok(());
        }
        let added = self
            .metadata
            .add_external_ids(resolved.id, &resolved.pending_ids, timestamp::now())
            .await?;
        if added > 0 {
            self.metadata
                .touch_location(resolved.id, timestamp::now())
                .await?;
            tracing::debug!(location_id = %resolved.id, added, "Attached external ids");
        }
        Ok(())
    }

    fn log_availability(&self, entry: AvailabilityLogEntry) {
        let metadata = self.metadata.clone();
        let reporter = self.reporter.clone();
        self.spawn_background(async move {
            let result: EngineResult<()> = async {
                let row = AvailabilityLogRow::from_entry(&entry)?;
                metadata.append_availability_log(&row).await?;
                Ok(())
            }
            .await;
            if let Err(error) = result {
                reporter.report("availability_log", &error);
            }
        });
    }
}

fn new_record(location_id: Uuid, report: &NormalizedReport) -> AvailabilityRecord {
    AvailabilityRecord {
        location_id,
        source: report.source.clone(),
        values: report.values.clone(),
        valid_at: report.valid_at,
        checked_at: report.checked_at,
        changed_at: report.valid_at,
        is_public: report.is_public,
    }
}

/// Decide what an accepted report does to `stored` and build the new record.
fn apply_report(
    stored: AvailabilityRecord,
    report: &NormalizedReport,
) -> (UpdateKind, AvailabilityRecord) {
    if stored.valid_at >= report.valid_at {
        let next = AvailabilityRecord {
            checked_at: report.checked_at,
            ..stored
        };
        return (UpdateKind::CheckedOnly, next);
    }

    if stored.values == report.values {
        let next = AvailabilityRecord {
            checked_at: report.checked_at,
            valid_at: report.valid_at,
            is_public: report.is_public,
            ..stored
        };
        return (UpdateKind::Validated, next);
    }

    let next = AvailabilityRecord {
        values: report.values.clone(),
        valid_at: report.valid_at,
        checked_at: report.checked_at,
        changed_at: report.valid_at,
        is_public: report.is_public,
        ..stored
    };
    (UpdateKind::Changed, next)
}

fn full_entry(record: &AvailabilityRecord) -> AvailabilityLogEntry {
    AvailabilityLogEntry {
        location_id: record.location_id,
        source: record.source.clone(),
        checked_at: record.checked_at,
        valid_at: Some(record.valid_at),
        changed_at: Some(record.changed_at),
        values: Some(record.values.clone()),
        is_public: Some(record.is_public),
    }
}

fn log_entry(kind: UpdateKind, record: &AvailabilityRecord) -> AvailabilityLogEntry {
    match kind {
        UpdateKind::CheckedOnly => AvailabilityLogEntry {
            location_id: record.location_id,
            source: record.source.clone(),
            checked_at: record.checked_at,
            valid_at: None,
            changed_at: None,
            values: None,
            is_public: None,
        },
        UpdateKind::Validated => AvailabilityLogEntry {
            valid_at: Some(record.valid_at),
            ..log_entry(UpdateKind::CheckedOnly, record)
        },
        UpdateKind::Changed => full_entry(record),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;
    use time::macros::datetime;
    use univaf_core::Availability;

    fn report(checked_at: time::OffsetDateTime, available: Availability) -> NormalizedReport {
        let mut report = AvailabilityReport::new("cvs", checked_at);
        report.available = Some(available);
        report.normalize().unwrap()
    }

    #[test]
    fn test_older_data_only_moves_watermark() {
        let t0 = datetime!(2021-05-14 06:00:00 UTC);
        let stored = new_record(Uuid::nil(), &report(t0, Availability::Yes));

        let mut late = AvailabilityReport::new("cvs", t0 + Duration::minutes(5));
        late.valid_at = Some(t0 - Duration::minutes(5));
        late.available = Some(Availability::No);
        let late = late.normalize().unwrap();

        let (kind, next) = apply_report(stored.clone(), &late);
        assert_eq!(kind, UpdateKind::CheckedOnly);
        assert_eq!(next.values, stored.values);
        assert_eq!(next.valid_at, t0);
        assert_eq!(next.checked_at, t0 + Duration::minutes(5));

        let entry = log_entry(kind, &next);
        assert!(entry.valid_at.is_none());
        assert!(entry.values.is_none());
    }

    #[test]
    fn test_same_values_keep_changed_at() {
        let t0 = datetime!(2021-05-14 06:00:00 UTC);
        let stored = new_record(Uuid::nil(), &report(t0, Availability::Yes));
        let t1 = t0 + Duration::hours(1);

        let (kind, next) = apply_report(stored, &report(t1, Availability::Yes));
        assert_eq!(kind, UpdateKind::Validated);
        assert_eq!(next.valid_at, t1);
        assert_eq!(next.changed_at, t0);

        let entry = log_entry(kind, &next);
        assert_eq!(entry.valid_at, Some(t1));
        assert!(!entry.is_change());
    }

    #[test]
    fn test_changed_values_advance_changed_at() {
        let t0 = datetime!(2021-05-14 06:00:00 UTC);
        let stored = new_record(Uuid::nil(), &report(t0, Availability::Yes));
        let t1 = t0 + Duration::hours(1);

        let (kind, next) = apply_report(stored, &report(t1, Availability::No));
        assert_eq!(kind, UpdateKind::Changed);
        assert_eq!(next.values.available, Availability::No);
        assert_eq!(next.changed_at, t1);
        assert!(log_entry(kind, &next).is_change());
    }

    #[test]
    fn test_action_serializes_lowercase() {
        let outcome = ReconcileOutcome {
            action: ReconcileAction::Create,
            location_id: Uuid::nil(),
        };
        let json = serde_json::to_value(outcome).unwrap();
        assert_eq!(json["action"], "create");
    }
}
