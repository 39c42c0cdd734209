//! Locations and the external identifiers sources use to refer to them.

use crate::availability::Meta;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// An identifier a source system uses for a location, e.g. `kroger:123`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExternalId {
    pub system: String,
    pub value: String,
}

impl ExternalId {
    pub fn new(system: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            value: value.into(),
        }
    }

    /// The `system:value` grouping key.
    pub fn key(&self) -> String {
        format!("{}:{}", self.system, self.value)
    }

    /// Same identifier with numeric zero-padding removed from the value.
    pub fn unpadded(&self) -> Self {
        Self {
            system: self.system.clone(),
            value: unpad_value(&self.value),
        }
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.system, self.value)
    }
}

impl FromStr for ExternalId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((system, value)) if !system.is_empty() && !value.is_empty() => {
                Ok(Self::new(system, value))
            }
            _ => Err(Error::value(format!(
                "external id must look like 'system:value', got '{s}'"
            ))),
        }
    }
}

/// Strip leading zeros from an all-digit value ("00123" -> "123", "000" -> "0").
/// Anything that is not purely numeric is returned unchanged.
pub fn unpad_value(value: &str) -> String {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return value.to_string();
    }
    let trimmed = value.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Geographic coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

/// A physical place where vaccines are offered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: Uuid,
    pub provider: String,
    #[serde(default)]
    pub location_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address_lines: Option<Vec<String>>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub county: Option<String>,
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub info_phone: Option<String>,
    #[serde(default)]
    pub info_url: Option<String>,
    #[serde(default)]
    pub booking_phone: Option<String>,
    #[serde(default)]
    pub booking_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub meta: Meta,
    pub is_public: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(default)]
    pub external_ids: Vec<ExternalId>,
}

impl Location {
    /// A public location with only the required fields set.
    pub fn new(id: Uuid, provider: impl Into<String>, created_at: OffsetDateTime) -> Self {
        Self {
            id,
            provider: provider.into(),
            location_type: None,
            name: None,
            address_lines: None,
            city: None,
            state: None,
            postal_code: None,
            county: None,
            position: None,
            info_phone: None,
            info_url: None,
            booking_phone: None,
            booking_url: None,
            description: None,
            meta: Meta::new(),
            is_public: true,
            created_at,
            updated_at: created_at,
            external_ids: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_id_parse() {
        let id: ExternalId = "kroger:123".parse().unwrap();
        assert_eq!(id, ExternalId::new("kroger", "123"));
        assert_eq!(id.to_string(), "kroger:123");

        // Only the first colon separates system from value.
        let id: ExternalId = "vtrcks:abc:def".parse().unwrap();
        assert_eq!(id.value, "abc:def");

        assert!("kroger".parse::<ExternalId>().is_err());
        assert!(":123".parse::<ExternalId>().is_err());
        assert!("kroger:".parse::<ExternalId>().is_err());
    }

    #[test]
    fn test_unpad_value() {
        assert_eq!(unpad_value("00123"), "123");
        assert_eq!(unpad_value("000"), "0");
        assert_eq!(unpad_value("0a12"), "0a12");
        assert_eq!(unpad_value(""), "");
    }
}
