//! Application configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use serde_with::serde_as;
use tracing::warn;

use crate::errors::MeterRecorderError;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub supervisor: SupervisorConfig,
    pub dedup: DedupConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

/// How to launch one external process.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct CommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct SupervisorConfig {
    /// rtl_tcp or a compatible radio-to-TCP bridge
    pub bridge: CommandConfig,
    /// rtlamr or a compatible decoder printing one JSON object per line
    pub decoder: CommandConfig,
    /// Wait after starting each process before checking it is still alive
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub grace_period: Duration,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct DedupConfig {
    /// Repeats of an unchanged reading within this window are dropped
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub window: Duration,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone, Default)]
pub struct IngestConfig {
    /// Log a warning whenever the decoder stays silent this long
    #[serde_as(as = "Option<serde_with::DurationSeconds<u64>>")]
    #[serde(default)]
    pub idle_timeout: Option<Duration>,
}

impl AppConfig {
    /// Load configuration from defaults, `config/default`, and `METERREC__*`
    /// environment variables. `database` overrides the configured path.
    pub fn load(database: Option<&Path>) -> Result<Self, ConfigError> {
        let config = Self::defaults()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(
                Environment::with_prefix("METERREC")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("supervisor.bridge.args")
                    .with_list_parse_key("supervisor.decoder.args"),
            )
            .set_override_option(
                "database.path",
                database.map(|p| p.to_string_lossy().into_owned()),
            )?
            .build()?;

        config.try_deserialize()
    }

    fn defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("database.path", "meter.db")?
            .set_default("supervisor.grace_period", 3)?
            .set_default("supervisor.bridge.program", "rtl_tcp")?
            .set_default("supervisor.bridge.args", Vec::<String>::new())?
            .set_default("supervisor.decoder.program", "rtlamr")?
            .set_default(
                "supervisor.decoder.args",
                vec!["-msgtype=scm+".to_string(), "-format=json".to_string()],
            )?
            .set_default("dedup.window", 900)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<(), MeterRecorderError> {
        self.database.validate()?;
        self.supervisor.validate()?;
        self.dedup.validate()
    }
}

impl DatabaseConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), MeterRecorderError> {
        self.validate_path()?;
        if let Some(dir) = self.path.parent() {
            self.ensure_directory_exists(dir)?;
        }
        Ok(())
    }

    fn validate_path(&self) -> Result<(), MeterRecorderError> {
        if self.path.as_os_str().is_empty() {
            return Err(MeterRecorderError::ConfigurationError {
                message: "Database path cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    fn ensure_directory_exists(&self, dir: &Path) -> Result<(), MeterRecorderError> {
        // A bare file name has an empty parent: the working directory.
        if dir.as_os_str().is_empty() || dir.exists() {
            return Ok(());
        }
        warn!("Database directory does not exist, attempting to create it");
        std::fs::create_dir_all(dir).map_err(|e| MeterRecorderError::ConfigurationError {
            message: format!("Could not create database directory: {}", e),
        })
    }
}

impl SupervisorConfig {
    pub fn validate(&self) -> Result<(), MeterRecorderError> {
        for (name, command) in [("bridge", &self.bridge), ("decoder", &self.decoder)] {
            if command.program.trim().is_empty() {
                return Err(MeterRecorderError::ConfigurationError {
                    message: format!("{} program cannot be empty", name),
                });
            }
        }
        Ok(())
    }
}

impl DedupConfig {
    pub fn validate(&self) -> Result<(), MeterRecorderError> {
        if self.window.is_zero() {
            return Err(MeterRecorderError::ConfigurationError {
                message: "Deduplication window must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
