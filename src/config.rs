//! Configuration management for Turnstile.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::{ConfiguredStrategy, IdentitySource, Method, RateConfig};

/// Prefix for environment variable overrides, e.g. `TURNSTILE__STORE__URL`.
const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for the Turnstile limiter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Backing store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate applied to enabled routes without their own
    #[serde(default)]
    pub default_rate: Option<RateConfig>,

    /// Where caller identities come from
    #[serde(default)]
    pub identity: IdentitySource,

    /// Fixed key prefix replacing `<method>:<path>`
    #[serde(default)]
    pub key_prefix: Option<String>,

    /// Per-route settings
    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backing store selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Counters kept in process memory.
    Memory {
        /// Interval between sweeps of expired counters
        #[serde(default = "default_sweep_interval")]
        sweep_interval_secs: u64,
    },
    /// Counters kept in a shared Redis instance.
    Redis {
        /// Connection URL, e.g. `redis://127.0.0.1:6379`
        url: String,
        /// Response timeout for every command
        #[serde(default = "default_response_timeout")]
        response_timeout_ms: u64,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory {
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_response_timeout() -> u64 {
    1000
}

/// Rate limit settings for one route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Route method
    pub method: Method,
    /// Route path template
    pub path: String,
    /// Whether the route is limited; routes are unlimited unless enabled
    #[serde(default)]
    pub enabled: bool,
    /// Route-specific limit, requires `window`
    #[serde(default)]
    pub limit: Option<u64>,
    /// Route-specific window in seconds, requires `limit`
    #[serde(default)]
    pub window: Option<u64>,
    /// Route-specific key prefix
    #[serde(default)]
    pub key_prefix: Option<String>,
}

impl RouteConfig {
    /// The route's own rate, if it declares one.
    pub fn rate(&self) -> Result<Option<RateConfig>> {
        match (self.limit, self.window) {
            (Some(limit), Some(window)) => RateConfig::new(limit, window).map(Some),
            (None, None) => Ok(None),
            _ => Err(TurnstileError::Config(format!(
                "route {}:{} must set both limit and window",
                self.method, self.path
            ))),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TurnstileConfig {
    /// Load configuration from a file, with `TURNSTILE__*` environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let config: TurnstileConfig = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .and_then(config::Config::try_deserialize)
            .map_err(|e| TurnstileError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse configuration: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Check every configured rate.
    pub fn validate(&self) -> Result<()> {
        if let Some(rate) = &self.default_rate {
            rate.validate()?;
        }
        for route in &self.routes {
            route.rate()?;
        }
        if let StoreConfig::Memory {
            sweep_interval_secs: 0,
        } = self.store
        {
            return Err(TurnstileError::Config(
                "store.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// The global strategy described by this configuration.
    pub fn strategy(&self) -> Result<ConfiguredStrategy> {
        self.validate()?;
        Ok(ConfiguredStrategy {
            identity: self.identity.clone(),
            prefix: self.key_prefix.clone(),
            default_rate: self.default_rate,
        })
    }
}

impl StoreConfig {
    /// Redis response timeout, if this is a Redis store.
    pub fn response_timeout(&self) -> Option<Duration> {
        match self {
            StoreConfig::Redis {
                response_timeout_ms, ..
            } => Some(Duration::from_millis(*response_timeout_ms)),
            StoreConfig::Memory { .. } => None,
        }
    }
}
