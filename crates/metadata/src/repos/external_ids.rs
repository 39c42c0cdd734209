//! External identifier repository.

use crate::error::MetadataResult;
use crate::models::ExternalIdRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use univaf_core::ExternalId;
use uuid::Uuid;

/// Repository for external identifier operations.
#[async_trait]
pub trait ExternalIdRepo: Send + Sync {
    /// Attach ids to a location. Triples the location already holds are
    /// skipped; returns how many were inserted.
    async fn add_external_ids(
        &self,
        location_id: Uuid,
        ids: &[ExternalId],
        created_at: OffsetDateTime,
    ) -> MetadataResult<u64>;

    /// Ids of one location, in insertion order.
    async fn list_external_ids(&self, location_id: Uuid) -> MetadataResult<Vec<ExternalIdRow>>;

    /// Ids of many locations at once.
    async fn list_external_ids_for(
        &self,
        location_ids: &[Uuid],
    ) -> MetadataResult<Vec<ExternalIdRow>>;
}
