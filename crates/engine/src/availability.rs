//! Read side of availability: merged views, raw records and history.

use crate::error::{EngineError, EngineResult};
use crate::state::Engine;
use univaf_core::{
    AvailabilityLogEntry, AvailabilityRecord, Location, MergedAvailability, merge_availability,
};
use univaf_metadata::repos::{AvailabilityLogRepo, AvailabilityRepo, ExternalIdRepo, LocationRepo};
use uuid::Uuid;

impl Engine {
    /// The published availability for a location, blended across sources.
    ///
    /// Returns `None` when the location exists but no source has reported on
    /// it (or, without `include_private`, only private records exist).
    pub async fn get_merged_availability(
        &self,
        location_id: Uuid,
        include_private: bool,
    ) -> EngineResult<Option<MergedAvailability>> {
        let records: Vec<AvailabilityRecord> = self
            .list_availability(location_id)
            .await?
            .into_iter()
            .filter(|r| include_private || r.is_public)
            .collect();

        if records.is_empty() && self.metadata.get_location(location_id).await?.is_none() {
            return Err(EngineError::NotFound(format!("location {location_id}")));
        }
        Ok(merge_availability(&records))
    }

    /// Every source's current record for a location.
    pub async fn list_availability(
        &self,
        location_id: Uuid,
    ) -> EngineResult<Vec<AvailabilityRecord>> {
        self.metadata
            .list_availability(location_id)
            .await?
            .into_iter()
            .map(|row| row.into_record().map_err(EngineError::from))
            .collect()
    }

    /// Availability history, oldest first.
    pub async fn list_availability_log(
        &self,
        location_id: Uuid,
        source: Option<&str>,
    ) -> EngineResult<Vec<AvailabilityLogEntry>> {
        self.metadata
            .list_availability_log(location_id, source)
            .await?
            .into_iter()
            .map(|row| row.into_entry().map_err(EngineError::from))
            .collect()
    }

    /// A location with its external ids.
    pub async fn get_location(&self, location_id: Uuid) -> EngineResult<Location> {
        let row = self
            .metadata
            .get_location(location_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("location {location_id}")))?;
        let ids = self
            .metadata
            .list_external_ids(location_id)
            .await?
            .iter()
            .map(|row| row.external_id())
            .collect();
        Ok(row.into_location(ids)?)
    }
}
