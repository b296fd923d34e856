//! Decoder output consumption: read, parse, deduplicate, persist.

use std::time::Duration;

use tokio::io::{AsyncBufRead, Split};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    database::Database,
    dedup::{Decision, DedupFilter},
    errors::MeterRecorderError,
    parser::parse_reading,
};

/// Why the loop stopped reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The decoder closed its output
    EndOfStream,
    /// Shutdown was requested
    Cancelled,
}

/// Line counters for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub received: u64,
    pub malformed: u64,
    pub suppressed: u64,
    pub persisted: u64,
}

/// Owns the dedup state and the store for the lifetime of one run
pub struct Ingestor {
    filter: DedupFilter,
    database: Database,
    idle_timeout: Option<Duration>,
    stats: IngestStats,
}

impl Ingestor {
    pub fn new(database: Database, window: Duration, idle_timeout: Option<Duration>) -> Self {
        Self {
            filter: DedupFilter::new(window),
            database,
            idle_timeout,
            stats: IngestStats::default(),
        }
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// Consume `lines` until they end or `shutdown` fires.
    ///
    /// Malformed lines are logged and skipped. A persistence failure ends the
    /// run with an error.
    pub async fn run<R>(
        &mut self,
        lines: &mut Split<R>,
        shutdown: &CancellationToken,
    ) -> Result<IngestOutcome, MeterRecorderError>
    where
        R: AsyncBufRead + Unpin,
    {
        info!("Consuming available meter data...");
        loop {
            let line = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(IngestOutcome::Cancelled),
                line = lines.next_segment() => line?,
                _ = idle(self.idle_timeout) => {
                    warn!("No decoder output for {:?}", self.idle_timeout.unwrap_or_default());
                    continue;
                }
            };

            match line {
                Some(line) => self.handle_line(&line)?,
                None => return Ok(IngestOutcome::EndOfStream),
            }
        }
    }

    /// Process one raw decoder line
    pub fn handle_line(&mut self, line: &[u8]) -> Result<(), MeterRecorderError> {
        let line = line.trim_ascii();
        if line.is_empty() {
            return Ok(());
        }
        self.stats.received += 1;
        debug!("Received stdout -> {}", String::from_utf8_lossy(line));

        let reading = match parse_reading(line) {
            Ok(reading) => reading,
            Err(e) => {
                self.stats.malformed += 1;
                warn!("Discarding decoder line: {}", e);
                return Ok(());
            }
        };

        if self.filter.check(&reading) == Decision::Suppress {
            self.stats.suppressed += 1;
            debug!(
                endpoint_id = reading.endpoint_id,
                "Received duplicate reading within allotted time interval, skipping persistence"
            );
            return Ok(());
        }

        self.database.insert_reading(&reading)?;
        self.stats.persisted += 1;
        Ok(())
    }

    pub fn log_summary(&self) {
        let stored = match self.database.count_readings() {
            Ok(count) => count,
            Err(e) => {
                warn!("Could not count stored readings: {}", e);
                -1
            }
        };
        info!(
            stored,
            received = self.stats.received,
            malformed = self.stats.malformed,
            suppressed = self.stats.suppressed,
            persisted = self.stats.persisted,
            channels = self.filter.channels(),
            "Ingestion finished"
        );
    }
}

async fn idle(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}
