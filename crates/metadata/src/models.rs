//! Database models mapping to the metadata schema.
//!
//! JSON-valued columns are kept as text in the row structs and converted at
//! the domain boundary.

use crate::error::{MetadataError, MetadataResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::FromRow;
use time::OffsetDateTime;
use univaf_core::{
    Availability, AvailabilityLogEntry, AvailabilityRecord, AvailabilityValues, ExternalId,
    Location, LocationUpdate, Meta, Position,
};
use uuid::Uuid;

fn to_json<T: Serialize>(column: &str, value: &T) -> MetadataResult<String> {
    serde_json::to_string(value).map_err(|e| MetadataError::serialization(column, e))
}

fn to_json_opt<T: Serialize>(column: &str, value: Option<&T>) -> MetadataResult<Option<String>> {
    value.map(|v| to_json(column, v)).transpose()
}

fn from_json<T: DeserializeOwned>(column: &str, text: &str) -> MetadataResult<T> {
    serde_json::from_str(text).map_err(|e| MetadataError::serialization(column, e))
}

fn from_json_opt<T: DeserializeOwned>(column: &str, text: Option<&str>) -> MetadataResult<Option<T>> {
    text.map(|t| from_json(column, t)).transpose()
}

fn parse_available(text: &str) -> MetadataResult<Availability> {
    text.parse()
        .map_err(|e| MetadataError::serialization("available", e))
}

// =============================================================================
// Locations
// =============================================================================

/// Location record. External ids live in their own table.
#[derive(Debug, Clone, FromRow)]
pub struct LocationRow {
    pub id: Uuid,
    pub provider: String,
    pub location_type: Option<String>,
    pub name: Option<String>,
    pub address_lines: Option<String>, // JSON array
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub county: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub info_phone: Option<String>,
    pub info_url: Option<String>,
    pub booking_phone: Option<String>,
    pub booking_url: Option<String>,
    pub description: Option<String>,
    pub meta: String, // JSON object
    pub is_public: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl LocationRow {
    pub fn from_location(location: &Location) -> MetadataResult<Self> {
        Ok(Self {
            id: location.id,
            provider: location.provider.clone(),
            location_type: location.location_type.clone(),
            name: location.name.clone(),
            address_lines: to_json_opt("address_lines", location.address_lines.as_ref())?,
            city: location.city.clone(),
            state: location.state.clone(),
            postal_code: location.postal_code.clone(),
            county: location.county.clone(),
            latitude: location.position.map(|p| p.latitude),
            longitude: location.position.map(|p| p.longitude),
            info_phone: location.info_phone.clone(),
            info_url: location.info_url.clone(),
            booking_phone: location.booking_phone.clone(),
            booking_url: location.booking_url.clone(),
            description: location.description.clone(),
            meta: to_json("meta", &location.meta)?,
            is_public: location.is_public,
            created_at: location.created_at,
            updated_at: location.updated_at,
        })
    }

    /// Convert to the domain type, attaching the given external ids.
    pub fn into_location(self, external_ids: Vec<ExternalId>) -> MetadataResult<Location> {
        let position = match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(Position {
                latitude,
                longitude,
            }),
            _ => None,
        };
        Ok(Location {
            id: self.id,
            provider: self.provider,
            location_type: self.location_type,
            name: self.name,
            address_lines: from_json_opt("address_lines", self.address_lines.as_deref())?,
            city: self.city,
            state: self.state,
            postal_code: self.postal_code,
            county: self.county,
            position,
            info_phone: self.info_phone,
            info_url: self.info_url,
            booking_phone: self.booking_phone,
            booking_url: self.booking_url,
            description: self.description,
            meta: from_json::<Meta>("meta", &self.meta)?,
            is_public: self.is_public,
            created_at: self.created_at,
            updated_at: self.updated_at,
            external_ids,
        })
    }
}

/// External identifier attached to a location.
#[derive(Debug, Clone, FromRow)]
pub struct ExternalIdRow {
    pub location_id: Uuid,
    pub system: String,
    pub value: String,
    pub created_at: OffsetDateTime,
}

impl ExternalIdRow {
    pub fn external_id(&self) -> ExternalId {
        ExternalId::new(self.system.clone(), self.value.clone())
    }
}

/// Merge update values that need encoding before they can be bound.
pub(crate) struct LocationUpdateColumns {
    pub address_lines: Option<String>,
    pub meta: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl LocationUpdateColumns {
    /// Encode `update` against the target's meta as it is at commit time.
    ///
    /// Planned meta keys only fill in; keys the target holds now win.
    pub(crate) fn from_update(update: &LocationUpdate, current_meta: &str) -> MetadataResult<Self> {
        let meta = match &update.meta {
            Some(planned) => {
                let current: Meta = from_json("meta", current_meta)?;
                let mut merged = planned.clone();
                merged.extend(current);
                Some(to_json("meta", &merged)?)
            }
            None => None,
        };
        Ok(Self {
            address_lines: to_json_opt("address_lines", update.address_lines.as_ref())?,
            meta,
            latitude: update.position.map(|p| p.latitude),
            longitude: update.position.map(|p| p.longitude),
        })
    }
}

// =============================================================================
// Availability
// =============================================================================

/// Current availability for one (location, source).
#[derive(Debug, Clone, FromRow)]
pub struct AvailabilityRow {
    pub location_id: Uuid,
    pub source: String,
    pub available: String,
    pub available_count: Option<i64>,
    pub products: Option<String>, // JSON array
    pub doses: Option<String>,    // JSON array
    pub capacity: Option<String>, // JSON array of buckets
    pub slots: Option<String>,    // JSON array of slots
    pub meta: Option<String>,     // JSON object
    pub is_public: bool,
    pub valid_at: OffsetDateTime,
    pub checked_at: OffsetDateTime,
    pub changed_at: OffsetDateTime,
}

/// JSON text of the value columns shared by availability and its log.
struct ValueColumns {
    available: String,
    available_count: Option<i64>,
    products: Option<String>,
    doses: Option<String>,
    capacity: Option<String>,
    slots: Option<String>,
    meta: Option<String>,
}

impl ValueColumns {
    fn encode(values: &AvailabilityValues) -> MetadataResult<Self> {
        Ok(Self {
            available: values.available.as_str().to_string(),
            available_count: values.available_count,
            products: to_json_opt("products", values.products.as_ref())?,
            doses: to_json_opt("doses", values.doses.as_ref())?,
            capacity: to_json_opt("capacity", values.capacity.as_ref())?,
            slots: to_json_opt("slots", values.slots.as_ref())?,
            meta: to_json_opt("meta", values.meta.as_ref())?,
        })
    }

    fn decode(self) -> MetadataResult<AvailabilityValues> {
        Ok(AvailabilityValues {
            available: parse_available(&self.available)?,
            available_count: self.available_count,
            products: from_json_opt("products", self.products.as_deref())?,
            doses: from_json_opt("doses", self.doses.as_deref())?,
            capacity: from_json_opt("capacity", self.capacity.as_deref())?,
            slots: from_json_opt("slots", self.slots.as_deref())?,
            meta: from_json_opt("meta", self.meta.as_deref())?,
        })
    }
}

impl AvailabilityRow {
    pub fn from_record(record: &AvailabilityRecord) -> MetadataResult<Self> {
        let columns = ValueColumns::encode(&record.values)?;
        Ok(Self {
            location_id: record.location_id,
            source: record.source.clone(),
            available: columns.available,
            available_count: columns.available_count,
            products: columns.products,
            doses: columns.doses,
            capacity: columns.capacity,
            slots: columns.slots,
            meta: columns.meta,
            is_public: record.is_public,
            valid_at: record.valid_at,
            checked_at: record.checked_at,
            changed_at: record.changed_at,
        })
    }

    pub fn into_record(self) -> MetadataResult<AvailabilityRecord> {
        let values = ValueColumns {
            available: self.available,
            available_count: self.available_count,
            products: self.products,
            doses: self.doses,
            capacity: self.capacity,
            slots: self.slots,
            meta: self.meta,
        }
        .decode()?;
        Ok(AvailabilityRecord {
            location_id: self.location_id,
            source: self.source,
            values,
            valid_at: self.valid_at,
            checked_at: self.checked_at,
            changed_at: self.changed_at,
            is_public: self.is_public,
        })
    }
}

/// Append-only availability history entry.
///
/// Compact entries leave every value column null.
#[derive(Debug, Clone, FromRow)]
pub struct AvailabilityLogRow {
    /// Assigned by the database; ignored on insert.
    pub id: i64,
    pub location_id: Uuid,
    pub source: String,
    pub checked_at: OffsetDateTime,
    pub valid_at: Option<OffsetDateTime>,
    pub changed_at: Option<OffsetDateTime>,
    pub available: Option<String>,
    pub available_count: Option<i64>,
    pub products: Option<String>,
    pub doses: Option<String>,
    pub capacity: Option<String>,
    pub slots: Option<String>,
    pub meta: Option<String>,
    pub is_public: Option<bool>,
}

impl AvailabilityLogRow {
    pub fn from_entry(entry: &AvailabilityLogEntry) -> MetadataResult<Self> {
        let columns = entry.values.as_ref().map(ValueColumns::encode).transpose()?;
        let mut row = Self {
            id: 0,
            location_id: entry.location_id,
            source: entry.source.clone(),
            checked_at: entry.checked_at,
            valid_at: entry.valid_at,
            changed_at: entry.changed_at,
            available: None,
            available_count: None,
            products: None,
            doses: None,
            capacity: None,
            slots: None,
            meta: None,
            is_public: entry.is_public,
        };
        if let Some(columns) = columns {
            row.available = Some(columns.available);
            row.available_count = columns.available_count;
            row.products = columns.products;
            row.doses = columns.doses;
            row.capacity = columns.capacity;
            row.slots = columns.slots;
            row.meta = columns.meta;
        }
        Ok(row)
    }

    pub fn into_entry(self) -> MetadataResult<AvailabilityLogEntry> {
        // `available` is only written for full entries.
        let values = match self.available {
            Some(available) => Some(
                ValueColumns {
                    available,
                    available_count: self.available_count,
                    products: self.products,
                    doses: self.doses,
                    capacity: self.capacity,
                    slots: self.slots,
                    meta: self.meta,
                }
                .decode()?,
            ),
            None => None,
        };
        Ok(AvailabilityLogEntry {
            location_id: self.location_id,
            source: self.source,
            checked_at: self.checked_at,
            valid_at: self.valid_at,
            changed_at: self.changed_at,
            values,
            is_public: self.is_public,
        })
    }
}
