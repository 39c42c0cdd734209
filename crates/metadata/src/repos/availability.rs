//! Availability repository.

use crate::error::MetadataResult;
use crate::models::AvailabilityRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for current per-source availability.
#[async_trait]
pub trait AvailabilityRepo: Send + Sync {
    /// Get the record for one (location, source).
    async fn get_availability(
        &self,
        location_id: Uuid,
        source: &str,
    ) -> MetadataResult<Option<AvailabilityRow>>;

    /// All records of a location, ordered by source.
    async fn list_availability(&self, location_id: Uuid) -> MetadataResult<Vec<AvailabilityRow>>;

    /// Insert a record unless one already exists for (location, source).
    /// Returns false when another writer got there first.
    async fn insert_availability(&self, row: &AvailabilityRow) -> MetadataResult<bool>;

    /// Overwrite the record for (location, source) only if the stored
    /// `checked_at` still equals `expected_checked_at` and is strictly older
    /// than `row.checked_at`.
    ///
    /// Returns the number of rows affected: 0 means the row moved on since
    /// it was read, or the write was stale.
    async fn update_availability_if_newer(
        &self,
        row: &AvailabilityRow,
        expected_checked_at: OffsetDateTime,
    ) -> MetadataResult<u64>;
}
