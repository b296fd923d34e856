//! Decoder line parsing and timestamp normalization.

use chrono::DateTime;

use crate::errors::ParseError;
use crate::models::{RawMessage, Reading};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// Parse one decoder output line into a [`Reading`].
///
/// The line must be a UTF-8 JSON object carrying `Time`, `Type`,
/// `Message.EndpointID` and `Message.Consumption`.
pub fn parse_reading(line: &[u8]) -> Result<Reading, ParseError> {
    let raw: RawMessage = serde_json::from_slice(line)?;
    let timestamp = parse_timestamp(&raw.time)?;

    Ok(Reading {
        timestamp,
        meter_type: raw.meter_type,
        endpoint_id: raw.message.endpoint_id,
        consumption: raw.message.consumption,
    })
}

/// Convert a decoder timestamp to whole seconds from Unix epoch.
pub fn parse_timestamp(value: &str) -> Result<i64, ParseError> {
    let normalized = normalize_timestamp(value);
    DateTime::parse_from_str(&normalized, TIMESTAMP_FORMAT)
        .map(|dt| dt.timestamp())
        .map_err(|source| ParseError::MalformedTimestamp {
            value: value.to_string(),
            source,
        })
}

/// Rewrite `YYYY-MM-DDTHH:MM:SS[.fff][±HH:MM|Z]` as `YYYY-MM-DDTHH:MM:SS±HHMM`.
///
/// Anything else is returned with fractional seconds removed and left for the
/// date-time parser to reject.
fn normalize_timestamp(value: &str) -> String {
    let mut s = value.trim().to_string();

    if let Some(dot) = s.find('.') {
        let digits = s[dot + 1..]
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(s.len() - dot - 1);
        if digits > 0 {
            s.replace_range(dot..dot + 1 + digits, "");
        }
    }

    if s.ends_with('Z') || s.ends_with('z') {
        s.pop();
        s.push_str("+0000");
        return s;
    }

    // Only a colon inside a trailing ±HH:MM offset is dropped.
    let bytes = s.as_bytes();
    let len = bytes.len();
    if len >= 6 && matches!(bytes[len - 6], b'+' | b'-') && bytes[len - 3] == b':' {
        s.remove(len - 3);
    }

    s
}
