use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::trace;

/// Longest accepted period for any minute-valued setting (one year)
pub const MAX_MINUTES: u64 = 366 * 24 * 60;

/// Longest accepted period for any second-valued setting
pub const MAX_SECONDS: u64 = MAX_MINUTES * 60;

/// Errors raised while loading the daemon configuration or a pollfile
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("duplicate device name '{0}'")]
    DuplicateDevice(String),

    #[error("device '{device}': invalid {field} pattern '{pattern}': {source}")]
    InvalidPattern {
        device: String,
        field: &'static str,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("device '{device}': invalid address '{address}'")]
    InvalidAddress { device: String, address: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    pub polling: PollingConfig,
    pub scheduler: SchedulerConfig,
    pub state: StateConfig,
    pub persistence: PersistenceConfig,
    pub archive: ArchiveConfig,
    pub api: ApiSettings,
    pub logging: LoggingConfig,
}

/// Where the pollfile lives and how often it is re-checked
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub file: PathBuf,

    /// Minutes between pollfile checks
    pub period: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("polldevs.toml"),
            period: 1,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds before an outstanding poll is abandoned
    pub timeout: u64,

    /// Upper bound on concurrently running polls
    pub max_in_flight: usize,

    /// Jitter bound as a fraction of the device interval
    pub jitter: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timeout: 5,
            max_in_flight: 32,
            jitter: 0.1,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Tunables of the per-entity state machines
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Consecutive failed polls before an entity is considered unreachable
    pub failure_threshold: u32,

    /// Sliding window for flap detection, in seconds
    pub flap_window: u64,

    /// Number of up/down flips inside the window that makes an entity flapping
    pub flap_threshold: usize,

    /// Seconds a vanished or stale entity is kept before it is dropped
    pub disappearance_grace: u64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            flap_window: 300,
            flap_threshold: 4,
            disappearance_grace: 600,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub file: PathBuf,

    /// Minutes between periodic snapshot saves
    pub period: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("zino-state.json"),
            period: 5,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub file: PathBuf,

    /// Minutes a closed event stays in the live store
    pub grace: u64,

    /// Minutes between expiry sweeps
    pub check_interval: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("zino-archive.jsonl"),
            grace: 8 * 60,
            check_interval: 30,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub bind: SocketAddr,

    /// File holding "user token" pairs, one per line
    pub secrets: PathBuf,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8001)),
            secrets: PathBuf::from("secrets"),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Reject values the core cannot operate with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.polling.period == 0 {
            return Err(ConfigError::invalid("polling.period", "must be positive"));
        }
        if self.scheduler.timeout == 0 {
            return Err(ConfigError::invalid("scheduler.timeout", "must be positive"));
        }
        if self.scheduler.max_in_flight == 0 {
            return Err(ConfigError::invalid(
                "scheduler.max_in_flight",
                "must be positive",
            ));
        }
        if !(0.0..=0.5).contains(&self.scheduler.jitter) {
            return Err(ConfigError::invalid(
                "scheduler.jitter",
                "must be within [0, 0.5]",
            ));
        }
        if self.state.failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "state.failure_threshold",
                "must be positive",
            ));
        }
        if self.state.flap_window == 0 || self.state.flap_threshold == 0 {
            return Err(ConfigError::invalid(
                "state.flap_window/flap_threshold",
                "must be positive",
            ));
        }
        if self.persistence.period == 0 {
            return Err(ConfigError::invalid("persistence.period", "must be positive"));
        }
        if self.archive.check_interval == 0 {
            return Err(ConfigError::invalid(
                "archive.check_interval",
                "must be positive",
            ));
        }

        for (field, value) in [
            ("polling.period", self.polling.period),
            ("persistence.period", self.persistence.period),
            ("archive.grace", self.archive.grace),
            ("archive.check_interval", self.archive.check_interval),
        ] {
            at_most(field, value, MAX_MINUTES, "minutes")?;
        }
        for (field, value) in [
            ("scheduler.timeout", self.scheduler.timeout),
            ("state.flap_window", self.state.flap_window),
            ("state.disappearance_grace", self.state.disappearance_grace),
        ] {
            at_most(field, value, MAX_SECONDS, "seconds")?;
        }
        Ok(())
    }
}

fn at_most(field: &str, value: u64, max: u64, unit: &str) -> Result<(), ConfigError> {
    if value > max {
        return Err(ConfigError::invalid(
            field,
            format!("{value} exceeds the maximum of {max} {unit}"),
        ));
    }
    Ok(())
}

pub fn read_config_file(path: impl Into<PathBuf>) -> Result<Config, ConfigError> {
    let path = path.into();
    let file_content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let config: Config =
        toml::from_str(&file_content).map_err(|source| ConfigError::Parse { path, source })?;
    config.validate()?;
    trace!("loaded config: {config:?}");
    Ok(config)
}
