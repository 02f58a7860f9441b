//! Configuration system for activationd.
//!
//! Configuration is loaded from multiple sources with the following precedence:
//! 1. Environment variables (highest priority)
//! 2. The TOML config file (`/etc/activationd/activationd.toml` unless `--config` is given)
//! 3. Default values (lowest priority)
//!
//! # Environment Variables
//!
//! - `ACTIVATIOND_SERVER_HOST` - Verification endpoint host
//! - `ACTIVATIOND_SERVER_PORT` - Verification endpoint port
//! - `ACTIVATIOND_SERVER_PATH` - Verification endpoint path
//! - `ACTIVATIOND_TIMEOUT_SECS` - Bound on one verification exchange
//! - `ACTIVATIOND_CHANNEL` - Distribution channel (oem, retail, volume)
//! - `ACTIVATIOND_GRACE_PERIOD_DAYS` - Days after install before checks start
//! - `ACTIVATIOND_POLL_INTERVAL_TICKS` - Ticks between checks once activated
//! - `ACTIVATIOND_TICK_SECS` - Scheduler tick length in seconds
//! - `ACTIVATIOND_DOCUMENTATION_URL` - Link included in every activation record
//! - `ACTIVATIOND_STORAGE_DIR` - Directory holding the key artifact
//! - `ACTIVATIOND_KEY_FILE` - Key artifact file name
//! - `ACTIVATIOND_LOG_LEVEL` - Log level (trace, debug, info, warn, error)

use config::Config;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::channel::Channel;
use crate::errors::{ActivationError, ActivationResult};

/// Default location of the config file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/activationd/activationd.toml";

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Verification endpoint
    pub server: ServerConfig,
    /// Scheduling and channel
    pub activation: ActivationConfig,
    /// Key artifact location
    pub storage: StorageConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Verification endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host name of the verification server
    pub host: String,
    /// TCP port (plain HTTP)
    pub port: u16,
    /// Request path, query string excluded
    pub path: String,
    /// Upper bound on connect + send + receive, in seconds
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "activation.example.com".to_string(),
            port: 80,
            path: "/activation/check".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Scheduling configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActivationConfig {
    /// Distribution channel name
    pub channel: String,
    /// Days after install during which no checks run
    pub grace_period_days: u64,
    /// Ticks between checks while activated (336 hourly ticks = 14 days)
    pub poll_interval_ticks: u64,
    /// Tick length in seconds
    pub tick_secs: u64,
    /// Human-readable help page referenced by every activation record
    pub documentation_url: String,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            channel: "oem".to_string(),
            grace_period_days: 30,
            poll_interval_ticks: 336,
            tick_secs: 3600,
            documentation_url: "https://activation.example.com/help".to_string(),
        }
    }
}

/// Key artifact location.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory created at first run
    pub directory: PathBuf,
    /// File name of the key artifact inside `directory`
    pub key_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("/etc/activationd"),
            key_file: "product.key".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn config_error(e: config::ConfigError) -> ActivationError {
    ActivationError::Config(e.to_string())
}

fn env_u64(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|v| v.parse::<u64>().ok())
}

impl DaemonConfig {
    /// Load configuration from file and environment, then validate it.
    ///
    /// A missing file is fine when `path` is `None`; an explicitly requested
    /// file must exist.
    pub fn load(path: Option<&Path>) -> ActivationResult<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::from(Path::new(DEFAULT_CONFIG_PATH)).required(false),
        };

        let defaults = DaemonConfig::default();

        let builder = Config::builder()
            // Start with defaults
            .set_default("server.host", defaults.server.host.clone())
            .map_err(config_error)?
            .set_default("server.port", i64::from(defaults.server.port))
            .map_err(config_error)?
            .set_default("server.path", defaults.server.path.clone())
            .map_err(config_error)?
            .set_default("server.timeout_secs", defaults.server.timeout_secs)
            .map_err(config_error)?
            .set_default("activation.channel", defaults.activation.channel.clone())
            .map_err(config_error)?
            .set_default(
                "activation.grace_period_days",
                defaults.activation.grace_period_days,
            )
            .map_err(config_error)?
            .set_default(
                "activation.poll_interval_ticks",
                defaults.activation.poll_interval_ticks,
            )
            .map_err(config_error)?
            .set_default("activation.tick_secs", defaults.activation.tick_secs)
            .map_err(config_error)?
            .set_default(
                "activation.documentation_url",
                defaults.activation.documentation_url.clone(),
            )
            .map_err(config_error)?
            .set_default(
                "storage.directory",
                defaults.storage.directory.to_string_lossy().into_owned(),
            )
            .map_err(config_error)?
            .set_default("storage.key_file", defaults.storage.key_file.clone())
            .map_err(config_error)?
            .set_default("logging.level", defaults.logging.level.clone())
            .map_err(config_error)?
            // Load from the config file
            .add_source(file)
            // Override with environment variables
            .set_override_option("server.host", env::var("ACTIVATIOND_SERVER_HOST").ok())
            .map_err(config_error)?
            .set_override_option("server.port", env_u64("ACTIVATIOND_SERVER_PORT"))
            .map_err(config_error)?
            .set_override_option("server.path", env::var("ACTIVATIOND_SERVER_PATH").ok())
            .map_err(config_error)?
            .set_override_option("server.timeout_secs", env_u64("ACTIVATIOND_TIMEOUT_SECS"))
            .map_err(config_error)?
            .set_override_option("activation.channel", env::var("ACTIVATIOND_CHANNEL").ok())
            .map_err(config_error)?
            .set_override_option(
                "activation.grace_period_days",
                env_u64("ACTIVATIOND_GRACE_PERIOD_DAYS"),
            )
            .map_err(config_error)?
            .set_override_option(
                "activation.poll_interval_ticks",
                env_u64("ACTIVATIOND_POLL_INTERVAL_TICKS"),
            )
            .map_err(config_error)?
            .set_override_option("activation.tick_secs", env_u64("ACTIVATIOND_TICK_SECS"))
            .map_err(config_error)?
            .set_override_option(
                "activation.documentation_url",
                env::var("ACTIVATIOND_DOCUMENTATION_URL").ok(),
            )
            .map_err(config_error)?
            .set_override_option("storage.directory", env::var("ACTIVATIOND_STORAGE_DIR").ok())
            .map_err(config_error)?
            .set_override_option("storage.key_file", env::var("ACTIVATIOND_KEY_FILE").ok())
            .map_err(config_error)?
            .set_override_option("logging.level", env::var("ACTIVATIOND_LOG_LEVEL").ok())
            .map_err(config_error)?;

        let settings = builder
            .build()
            .map_err(|e| ActivationError::Config(format!("failed to build config: {e}")))?;

        let config: DaemonConfig = settings
            .try_deserialize()
            .map_err(|e| ActivationError::Config(format!("failed to deserialize config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ActivationResult<()> {
        if self.server.host.trim().is_empty() {
            return Err(ActivationError::Config(
                "server.host cannot be empty".to_string(),
            ));
        }
        if self.server.port == 0 {
            return Err(ActivationError::Config(
                "server.port must be greater than 0".to_string(),
            ));
        }
        if !self.server.path.starts_with('/') {
            return Err(ActivationError::Config(format!(
                "server.path must start with '/', got '{}'",
                self.server.path
            )));
        }
        if self.server.timeout_secs == 0 {
            return Err(ActivationError::Config(
                "server.timeout_secs must be greater than 0".to_string(),
            ));
        }

        // Unknown channels surface here rather than on every tick.
        self.channel()?;

        if self.activation.poll_interval_ticks == 0 {
            return Err(ActivationError::Config(
                "activation.poll_interval_ticks must be greater than 0".to_string(),
            ));
        }
        if self.activation.tick_secs == 0 {
            return Err(ActivationError::Config(
                "activation.tick_secs must be greater than 0".to_string(),
            ));
        }
        // A stalled endpoint must not hold the loop past one tick.
        if self.server.timeout_secs >= self.activation.tick_secs {
            return Err(ActivationError::Config(format!(
                "server.timeout_secs ({}) must be shorter than activation.tick_secs ({})",
                self.server.timeout_secs, self.activation.tick_secs
            )));
        }

        if self.storage.key_file.trim().is_empty() {
            return Err(ActivationError::Config(
                "storage.key_file cannot be empty".to_string(),
            ));
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ActivationError::Config(format!(
                    "logging.level must be one of: trace, debug, info, warn, error. Got '{other}'"
                )));
            }
        }

        Ok(())
    }

    /// The configured distribution channel.
    pub fn channel(&self) -> ActivationResult<Channel> {
        self.activation.channel.parse()
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.activation.grace_period_days.saturating_mul(SECS_PER_DAY))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.activation.tick_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.timeout_secs)
    }
}
