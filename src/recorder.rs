//! Top-level run of the recorder.
//!
//! `Starting → Running → Draining → Stopped`. The run ends when the decoder
//! closes its output, when shutdown is requested, or on a fatal error; the
//! bridge and decoder are stopped on every one of those paths.

use std::process::ExitStatus;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::AppConfig,
    database::Database,
    errors::MeterRecorderError,
    ingest::{IngestOutcome, IngestStats, Ingestor},
    supervisor::{self, ManagedProcess, Processes},
};

/// How long a decoder that closed its output gets to exit on its own
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Starting,
    Running,
    Draining,
    Stopped,
}

struct StateMachine(State);

impl StateMachine {
    fn advance(&mut self, next: State) {
        debug!(from = ?self.0, to = ?next, "Recorder state change");
        self.0 = next;
    }
}

/// Run until the decoder exits or `shutdown` is cancelled.
pub async fn run(
    config: &AppConfig,
    shutdown: CancellationToken,
) -> Result<IngestStats, MeterRecorderError> {
    let mut state = StateMachine(State::Starting);
    config.validate()?;

    let database = Database::open(&config.database.path)?;
    info!("Database initialized successfully");
    let mut ingestor = Ingestor::new(database, config.dedup.window, config.ingest.idle_timeout);

    let Processes {
        mut bridge,
        mut decoder,
        output,
    } = tokio::select! {
        started = supervisor::start(&config.supervisor) => match started {
            Ok(processes) => processes,
            Err(e) => {
                state.advance(State::Stopped);
                return Err(e);
            }
        },
        // Dropping the startup future kills whatever it already spawned.
        _ = shutdown.cancelled() => {
            info!("Shutdown requested during startup");
            state.advance(State::Stopped);
            return Ok(ingestor.stats());
        }
    };
    state.advance(State::Running);

    let bridge_role = bridge.role();
    let bridge_program = bridge.program().to_string();
    let decoder_program = decoder.program().to_string();
    let mut lines = BufReader::new(output).split(b'\n');
    let result = tokio::select! {
        result = ingestor.run(&mut lines, &shutdown) => result,
        status = bridge.wait() => match status {
            Ok(status) => Err(MeterRecorderError::ProcessExited {
                process: bridge_role.to_string(),
                status,
            }),
            Err(e) => Err(e),
        },
    };

    let result = match result {
        Ok(outcome) => {
            state.advance(State::Draining);
            let status = match outcome {
                IngestOutcome::EndOfStream => drain(&mut decoder).await,
                IngestOutcome::Cancelled => None,
            };
            let status = match status {
                Some(status) => Some(status),
                None => decoder.shutdown().await,
            };
            log_exit(&decoder_program, status);
            Ok(ingestor.stats())
        }
        Err(e) => {
            error!("Stopping after fatal error: {}", e);
            let status = decoder.shutdown().await;
            log_exit(&decoder_program, status);
            Err(e)
        }
    };

    if let Some(status) = bridge.shutdown().await {
        debug!("Process {} exited with {}", bridge_program, status);
    }
    ingestor.log_summary();
    state.advance(State::Stopped);
    result
}

fn log_exit(program: &str, status: Option<ExitStatus>) {
    match status.and_then(|status| status.code()) {
        Some(code) => info!("Process {} exited with return code {}", program, code),
        None => match status {
            Some(status) => info!("Process {} exited ({})", program, status),
            None => warn!("Exit status of {} is unknown", program),
        },
    }
}

/// Give a decoder that closed its output a moment to exit by itself.
async fn drain(decoder: &mut ManagedProcess) -> Option<ExitStatus> {
    match tokio::time::timeout(DRAIN_TIMEOUT, decoder.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            warn!("Could not wait for {}: {}", decoder.program(), e);
            None
        }
        Err(_) => {
            warn!(
                "{} closed its output but did not exit within {:?}",
                decoder.program(),
                DRAIN_TIMEOUT
            );
            None
        }
    }
}
