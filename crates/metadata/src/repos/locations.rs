//! Location repository.

use crate::error::MetadataResult;
use crate::models::LocationRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use univaf_core::{ExternalId, LocationCursor};
use uuid::Uuid;

/// Typed predicate for location listings. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationFilter {
    pub provider: Option<String>,
    pub state: Option<String>,
    pub is_public: Option<bool>,
    /// Only locations holding at least one id in this system.
    pub external_id_system: Option<String>,
}

impl LocationFilter {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Repository for location operations.
#[async_trait]
pub trait LocationRepo: Send + Sync {
    /// Create a location.
    async fn create_location(&self, location: &LocationRow) -> MetadataResult<()>;

    /// Get a location by ID.
    async fn get_location(&self, id: Uuid) -> MetadataResult<Option<LocationRow>>;

    /// Locations holding any of `ids`, oldest first (by `created_at`, then `id`).
    async fn find_locations_by_external_ids(
        &self,
        ids: &[ExternalId],
    ) -> MetadataResult<Vec<LocationRow>>;

    /// One keyset page: rows matching `filter` whose `(created_at, id)` sorts
    /// after `after`, ascending, at most `limit` rows.
    async fn list_locations_after(
        &self,
        filter: &LocationFilter,
        after: Option<&LocationCursor>,
        limit: u32,
    ) -> MetadataResult<Vec<LocationRow>>;

    /// Bump `updated_at`.
    async fn touch_location(&self, id: Uuid, updated_at: OffsetDateTime) -> MetadataResult<()>;
}
