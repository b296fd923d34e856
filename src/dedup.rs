//! Suppression of repeated meter transmissions.
//!
//! Meters broadcast the same reading several times between consumption
//! updates. A reading is dropped when its channel already produced the exact
//! same consumption value less than `window` ago. The window restarts from
//! every accepted reading.

use std::collections::HashMap;
use std::time::Duration;

use crate::models::Reading;

/// Identity of a logical meter channel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub meter_type: String,
    pub endpoint_id: i64,
}

impl From<&Reading> for DedupKey {
    fn from(reading: &Reading) -> Self {
        Self {
            meter_type: reading.meter_type.clone(),
            endpoint_id: reading.endpoint_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Suppress,
}

/// Last accepted reading per channel.
///
/// Grows with the number of distinct channels heard, not with message volume.
#[derive(Debug)]
pub struct DedupFilter {
    window: i64,
    last_seen: HashMap<DedupKey, Reading>,
}

impl DedupFilter {
    pub fn new(window: Duration) -> Self {
        Self {
            window: i64::try_from(window.as_secs()).unwrap_or(i64::MAX),
            last_seen: HashMap::new(),
        }
    }

    /// Decide whether `reading` is a repeat; remember it if it is not.
    pub fn check(&mut self, reading: &Reading) -> Decision {
        let key = DedupKey::from(reading);

        if let Some(prior) = self.last_seen.get(&key) {
            let same_value = prior.consumption.to_bits() == reading.consumption.to_bits();
            let elapsed = reading.timestamp.saturating_sub(prior.timestamp);
            if same_value && elapsed < self.window {
                return Decision::Suppress;
            }
        }

        self.last_seen.insert(key, reading.clone());
        Decision::Accept
    }

    /// Number of channels seen so far
    pub fn channels(&self) -> usize {
        self.last_seen.len()
    }
}
