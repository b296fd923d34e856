//! Data models.

use serde::Deserialize;

/// One decoder output line, as emitted by `rtlamr -format=json`.
///
/// Only the fields the recorder needs are declared; everything else in the
/// message (checksums, tamper flags, offsets) is ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawMessage {
    /// Local receive time with UTC offset, e.g. `2023-05-01T10:15:30.123-05:00`
    #[serde(rename = "Time")]
    pub time: String,
    /// Message type used for decoding, e.g. `SCM`, `SCM+`, `IDM`
    #[serde(rename = "Type")]
    pub meter_type: String,
    #[serde(rename = "Message")]
    pub message: RawPayload,
}

/// Meter specific part of a decoder message
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawPayload {
    #[serde(rename = "EndpointID")]
    pub endpoint_id: i64,
    #[serde(rename = "Consumption")]
    pub consumption: f64,
}

/// Normalized meter reading
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Reading timestamp in seconds from Unix epoch (UTC).
    pub timestamp: i64,
    /// Decoder message type
    pub meter_type: String,
    /// Physical meter identifier
    pub endpoint_id: i64,
    /// Cumulative consumption as reported by the meter
    pub consumption: f64,
}
