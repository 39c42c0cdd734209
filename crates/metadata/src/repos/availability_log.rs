//! Availability history repository.

use crate::error::MetadataResult;
use crate::models::AvailabilityLogRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for the append-only availability log.
#[async_trait]
pub trait AvailabilityLogRepo: Send + Sync {
    /// Append an entry. `entry.id` is ignored.
    async fn append_availability_log(&self, entry: &AvailabilityLogRow) -> MetadataResult<()>;

    /// Entries of a location, optionally for one source, oldest first.
    async fn list_availability_log(
        &self,
        location_id: Uuid,
        source: Option<&str>,
    ) -> MetadataResult<Vec<AvailabilityLogRow>>;
}
