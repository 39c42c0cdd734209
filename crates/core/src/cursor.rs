//! Keyset pagination cursor for location listings.
//!
//! Locations are listed in `(created_at, id)` order. A cursor records the key
//! of the last row handed out; the next batch starts strictly after it.

use crate::error::{Error, Result};
use crate::timestamp;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

/// Maximum accepted length of an encoded cursor.
const MAX_ENCODED_LEN: usize = 256;

/// Position after the last yielded location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocationCursor {
    pub created_at: OffsetDateTime,
    pub id: Uuid,
}

impl LocationCursor {
    pub fn new(created_at: OffsetDateTime, id: Uuid) -> Self {
        Self {
            created_at: timestamp::normalize(created_at),
            id,
        }
    }

    /// Opaque string form, safe to put in a URL.
    pub fn encode(&self) -> String {
        // Rfc3339 formatting only fails for years outside 0..=9999.
        let created_at = self
            .created_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.created_at.unix_timestamp().to_string());
        URL_SAFE_NO_PAD.encode(format!("{created_at},{}", self.id))
    }

    /// Parse the output of [`LocationCursor::encode`].
    pub fn decode(encoded: &str) -> Result<Self> {
        if encoded.len() > MAX_ENCODED_LEN {
            return Err(Error::value(format!(
                "cursor too long: {} bytes (max: {MAX_ENCODED_LEN})",
                encoded.len()
            )));
        }
        let raw = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|e| Error::value(format!("invalid cursor encoding: {e}")))?;
        let raw = String::from_utf8(raw)
            .map_err(|_| Error::value("invalid cursor: not UTF-8".to_string()))?;

        let parts: Vec<&str> = raw.split(',').collect();
        let [created_at, id] = parts.as_slice() else {
            return Err(Error::value(format!(
                "invalid cursor: expected 2 components, found {}",
                parts.len()
            )));
        };

        let created_at = OffsetDateTime::parse(created_at, &Rfc3339)
            .map_err(|e| Error::value(format!("invalid cursor timestamp: {e}")))?;
        let id = Uuid::parse_str(id).map_err(|e| Error::value(format!("invalid cursor id: {e}")))?;

        Ok(Self::new(created_at, id))
    }
}

impl fmt::Display for LocationCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for LocationCursor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}
