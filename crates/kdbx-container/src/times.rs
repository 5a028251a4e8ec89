//! Timestamps as stored in the document
//!
//! Times are base64 of a little-endian i64 counting seconds since
//! 0001-01-01T00:00:00Z. Sub-second precision is not representable, so
//! everything here is truncated to whole seconds.

use crate::error::{EncodingError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, SubsecRound, Utc};

/// Seconds between 0001-01-01 and 1970-01-01
const UNIX_EPOCH_OFFSET: i64 = 62_135_596_800;

/// Current time truncated to whole seconds
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

pub fn encode(time: &DateTime<Utc>) -> String {
    let seconds = time.timestamp() + UNIX_EPOCH_OFFSET;
    BASE64.encode(seconds.to_le_bytes())
}

/// Decode a stored timestamp. ISO 8601 text is accepted too.
pub fn decode(text: &str) -> Result<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(bytes) = BASE64.decode(text) {
        if let Ok(bytes) = <[u8; 8]>::try_from(bytes.as_slice()) {
            let seconds = i64::from_le_bytes(bytes);
            return seconds
                .checked_sub(UNIX_EPOCH_OFFSET)
                .and_then(|unix| DateTime::from_timestamp(unix, 0))
                .ok_or_else(|| EncodingError::InvalidTimestamp(text.to_string()).into());
        }
    }
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc).trunc_subsecs(0))
        .map_err(|_| EncodingError::InvalidTimestamp(text.to_string()).into())
}

/// Creation, modification, access and expiry times of a group or entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Times {
    pub creation: DateTime<Utc>,
    pub last_modification: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
    pub expires: bool,
    pub usage_count: u64,
    pub location_changed: DateTime<Utc>,
}

impl Times {
    pub fn now() -> Self {
        let now = now();
        Self {
            creation: now,
            last_modification: now,
            last_access: now,
            expiry: now,
            expires: false,
            usage_count: 0,
            location_changed: now,
        }
    }

    /// Copy with `last_modification` (and access) set to now
    pub fn modified(&self) -> Self {
        let now = now();
        Self {
            last_modification: now,
            last_access: now,
            ..self.clone()
        }
    }

    pub fn is_expired(&self, at: DateTime<Utc>) -> bool {
        self.expires && self.expiry < at
    }
}

impl Default for Times {
    fn default() -> Self {
        Self::now()
    }
}
