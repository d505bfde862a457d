use super::constant::*;
use crate::{utils, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json;
use std::fmt;
use std::fs;
use std::path::Path;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AppConfig {
    // app_name represents the name of current running service.
    pub app_name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            app_name: DEFAULT_APP_NAME.into(),
        }
    }
}

// TrackerConfig represents the configuration items of the error tracker
// and its embedded circuit breaker registry.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TrackerConfig {
    // ledger_capacity caps the in-memory error ledger; oldest entries are evicted first.
    pub ledger_capacity: usize,
    // breaker_timeout_ms is the cooldown before an open breaker admits a probe.
    pub breaker_timeout_ms: u64,
    // breaker_failure_threshold is the failure count opening a breaker when
    // the matched pattern does not carry its own threshold.
    pub breaker_failure_threshold: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            ledger_capacity: DEFAULT_LEDGER_CAPACITY,
            breaker_timeout_ms: DEFAULT_BREAKER_TIMEOUT_MS,
            breaker_failure_threshold: DEFAULT_BREAKER_FAILURE_THRESHOLD,
        }
    }
}

// PerfConfig represents the configuration items of the performance monitor.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PerfConfig {
    pub buffer_capacity: usize,
    pub max_alerts: usize,
}

impl Default for PerfConfig {
    fn default() -> Self {
        PerfConfig {
            buffer_capacity: DEFAULT_METRIC_BUFFER_CAPACITY,
            max_alerts: DEFAULT_ALERT_CAPACITY,
        }
    }
}

// HealthConfig represents the configuration items of the health aggregator.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HealthConfig {
    // probe_timeout_ms bounds every single probe; a losing probe is reported
    // unhealthy with a timeout error.
    pub probe_timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        HealthConfig {
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
        }
    }
}

// VigilConfig represents the general configuration of the engine.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct VigilConfig {
    pub app: AppConfig,
    pub tracker: TrackerConfig,
    pub perf: PerfConfig,
    pub health: HealthConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ConfigEntity {
    pub version: String,
    pub config: VigilConfig,
}

impl Default for ConfigEntity {
    fn default() -> Self {
        ConfigEntity::new()
    }
}

impl ConfigEntity {
    pub fn new() -> Self {
        ConfigEntity {
            version: VIGIL_VERSION.into(),
            config: VigilConfig::default(),
        }
    }

    pub fn check(&self) -> Result<()> {
        if utils::is_blank(&self.version) {
            return Err(Error::msg("empty version"));
        }
        if utils::is_blank(&self.config.app.app_name) {
            return Err(Error::msg("empty app name"));
        }
        if self.config.tracker.ledger_capacity == 0 {
            return Err(Error::msg(
                "illegal tracker configuration: ledger_capacity == 0",
            ));
        }
        if self.config.tracker.breaker_timeout_ms == 0 {
            return Err(Error::msg(
                "illegal tracker configuration: breaker_timeout_ms == 0",
            ));
        }
        if self.config.tracker.breaker_failure_threshold == 0 {
            return Err(Error::msg(
                "illegal tracker configuration: breaker_failure_threshold == 0",
            ));
        }
        if self.config.perf.buffer_capacity == 0 {
            return Err(Error::msg(
                "illegal perf configuration: buffer_capacity == 0",
            ));
        }
        if self.config.perf.max_alerts == 0 {
            return Err(Error::msg("illegal perf configuration: max_alerts == 0"));
        }
        if self.config.health.probe_timeout_ms == 0 {
            return Err(Error::msg(
                "illegal health configuration: probe_timeout_ms == 0",
            ));
        }
        Ok(())
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let entity: ConfigEntity = serde_yaml::from_str(&contents)?;
        entity.check()?;
        Ok(entity)
    }

    /// Loads the entity from the file named by `VIGIL_CONFIG_FILE`, falling
    /// back to defaults when the variable is unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_FILE_ENV_KEY) {
            Ok(path) if !utils::is_blank(&path) => Self::from_yaml_file(path),
            _ => Ok(ConfigEntity::new()),
        }
    }

    /// The log level, overridable through the `VIGIL_LOG_LEVEL` environment
    /// variable.
    pub fn log_level(&self) -> String {
        std::env::var(LOG_LEVEL_ENV_KEY).unwrap_or_else(|_| DEFAULT_LOG_LEVEL.into())
    }
}

impl fmt::Display for ConfigEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmtted = serde_json::to_string_pretty(self).unwrap();
        write!(f, "{}", fmtted)
    }
}
