//! Startup and teardown of the radio bridge and decoder processes.
//!
//! The bridge (`rtl_tcp`) is started first and given a grace period to bind
//! its listener; the decoder (`rtlamr`) is started only once the bridge is
//! known to be alive, and gets the same grace period. Every child is spawned
//! with kill-on-drop so no exit path can leak a process.

use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, error, info, warn};

use crate::{
    config::{CommandConfig, SupervisorConfig},
    errors::MeterRecorderError,
};

/// A running child process and the role it plays
#[derive(Debug)]
pub struct ManagedProcess {
    role: &'static str,
    program: String,
    child: Child,
}

/// Both processes after a successful start
#[derive(Debug)]
pub struct Processes {
    pub bridge: ManagedProcess,
    pub decoder: ManagedProcess,
    /// Decoder standard output, one JSON message per line
    pub output: ChildStdout,
}

impl ManagedProcess {
    /// Spawn `command`. Standard error is always forwarded to the debug log;
    /// standard output too, unless `keep_stdout` hands it back to the caller.
    fn spawn(
        role: &'static str,
        command: &CommandConfig,
        keep_stdout: bool,
    ) -> Result<(Self, Option<ChildStdout>), MeterRecorderError> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MeterRecorderError::StartupFailure {
                process: role.to_string(),
                reason: format!("failed to spawn {}: {}", command.program, e),
            })?;

        if let Some(stderr) = child.stderr.take() {
            forward_lines(command.program.clone(), "stderr", stderr);
        }
        let mut stdout = child.stdout.take();
        if !keep_stdout {
            if let Some(stdout) = stdout.take() {
                forward_lines(command.program.clone(), "stdout", stdout);
            }
        }

        debug!(role, program = %command.program, pid = ?child.id(), "Spawned process");
        Ok((
            Self {
                role,
                program: command.program.clone(),
                child,
            },
            stdout,
        ))
    }

    pub fn role(&self) -> &'static str {
        self.role
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Exit status if the process has already ended
    pub fn try_status(&mut self) -> Result<Option<ExitStatus>, MeterRecorderError> {
        Ok(self.child.try_wait()?)
    }

    /// Wait for the process to end on its own
    pub async fn wait(&mut self) -> Result<ExitStatus, MeterRecorderError> {
        Ok(self.child.wait().await?)
    }

    /// Kill the process unless it already ended, and reap it.
    pub async fn shutdown(mut self) -> Option<ExitStatus> {
        match self.child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) => {}
            Err(e) => warn!("Could not poll {}: {}", self.program, e),
        }

        info!("Stopping {}...", self.program);
        if let Err(e) = self.child.start_kill() {
            warn!("Could not kill {}: {}", self.program, e);
        }
        match self.child.wait().await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!("Could not reap {}: {}", self.program, e);
                None
            }
        }
    }

    /// Wait out the grace period, then fail if the process is gone.
    async fn check_alive(&mut self, config: &SupervisorConfig) -> Result<(), MeterRecorderError> {
        tokio::time::sleep(config.grace_period).await;
        if let Some(status) = self.try_status()? {
            error!("Could not initialize {}, exiting...", self.program);
            return Err(MeterRecorderError::StartupFailure {
                process: self.role.to_string(),
                reason: format!("{} exited during grace period ({})", self.program, status),
            });
        }
        info!("{} initialized successfully", self.program);
        Ok(())
    }
}

/// Start the bridge, then the decoder, checking each survives its grace period.
///
/// On any failure the bridge is stopped before the error is returned.
pub async fn start(config: &SupervisorConfig) -> Result<Processes, MeterRecorderError> {
    info!("Starting up {}...", config.bridge.program);
    let (mut bridge, _) = ManagedProcess::spawn("bridge", &config.bridge, false)?;
    bridge.check_alive(config).await?;

    info!("Starting up {}...", config.decoder.program);
    let spawned = ManagedProcess::spawn("decoder", &config.decoder, true);
    let (mut decoder, output) = match spawned {
        Ok((decoder, Some(output))) => (decoder, output),
        Ok((decoder, None)) => {
            decoder.shutdown().await;
            bridge.shutdown().await;
            return Err(MeterRecorderError::StartupFailure {
                process: "decoder".to_string(),
                reason: "standard output not captured".to_string(),
            });
        }
        Err(e) => {
            bridge.shutdown().await;
            return Err(e);
        }
    };

    if let Err(e) = decoder.check_alive(config).await {
        decoder.shutdown().await;
        bridge.shutdown().await;
        return Err(e);
    }

    Ok(Processes {
        bridge,
        decoder,
        output,
    })
}

/// Log every line of a diagnostic stream until it closes.
fn forward_lines<R>(program: String, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).split(b'\n');
        loop {
            match lines.next_segment().await {
                Ok(Some(line)) => {
                    debug!(process = %program, stream, "{}", String::from_utf8_lossy(&line).trim_end());
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(process = %program, stream, "Stopped reading: {}", e);
                    break;
                }
            }
        }
    });
}
