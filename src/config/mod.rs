//! Monitor configuration: loading, defaults and validation.
//!
//! A configuration is produced once (from a JSON file or built in code),
//! has defaults applied to its zero/absent fields, and is then validated.
//! After validation it is treated as immutable.

pub mod duration;

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// The only plugin kind this crate proxies.
pub const EXTERNAL_PLUGIN: &str = "external";

/// Smallest accepted poll interval and call timeout.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Defaults applied to zero/absent fields.
pub mod defaults {
    use std::time::Duration;

    /// Status poll interval.
    pub const INVOKE_INTERVAL: Duration = Duration::from_secs(30);
    /// Per-call timeout.
    pub const TIMEOUT: Duration = Duration::from_secs(10);
    /// Reconnection attempts before giving up.
    pub const MAX_ATTEMPTS: u32 = 5;
    /// Exponential backoff multiplier.
    pub const BACKOFF_MULTIPLIER: f64 = 2.0;
    /// Backoff ceiling.
    pub const MAX_BACKOFF: Duration = Duration::from_secs(5 * 60);
    /// First backoff delay.
    pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
    /// Health-probe cadence.
    pub const HEALTH_INTERVAL: Duration = Duration::from_secs(30);
    /// Health-probe and identity-fetch timeout.
    pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
    /// Consecutive errors that force a reconnection.
    pub const ERROR_THRESHOLD: u32 = 3;
}

/// Top-level configuration of one external monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    /// Plugin kind; must be `"external"`.
    pub plugin: String,
    /// Transport and polling settings.
    pub plugin_config: PluginConfig,
    /// Monitor source identifier.
    pub source: String,
    /// Accepted for compatibility with existing config files.
    #[serde(default)]
    pub metrics_reporting: bool,
    /// Conditions this monitor can report, used for the initial status.
    #[serde(default)]
    pub conditions: Vec<ConditionDefinition>,
}

/// Plugin transport and polling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginConfig {
    /// Unix socket path of the plugin's gRPC endpoint.
    pub socket_address: String,
    /// How often to call `CheckHealth`.
    #[serde(rename = "invoke_interval", default, with = "duration")]
    pub invoke_interval: Duration,
    /// Deadline of each status call.
    #[serde(default, with = "duration")]
    pub timeout: Duration,
    /// Skip the synthetic initial status.
    #[serde(rename = "skip_initial_status", default)]
    pub skip_initial_status: bool,
    /// Reconnection behaviour.
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    /// Health-probe behaviour.
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    /// Parameters forwarded verbatim on every poll.
    #[serde(default)]
    pub plugin_parameters: HashMap<String, String>,
}

/// Reconnection backoff policy.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Attempts before giving up.
    #[serde(default)]
    pub max_attempts: u32,
    /// Growth factor between attempts.
    #[serde(default)]
    pub backoff_multiplier: f64,
    /// Delay ceiling.
    #[serde(default, with = "duration")]
    pub max_backoff: Duration,
    /// Delay before the first attempt.
    #[serde(default, with = "duration")]
    pub initial_backoff: Duration,
}

/// Transport health-probe settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckConfig {
    /// Interval between liveness probes.
    #[serde(default, with = "duration")]
    pub interval: Duration,
    /// Timeout of probe-class calls (identity fetch, connect).
    #[serde(default, with = "duration")]
    pub timeout: Duration,
    /// Consecutive call errors that force a reconnection.
    #[serde(default)]
    pub error_threshold: u32,
}

/// A condition the monitor declares up front.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionDefinition {
    /// Condition type, e.g. `GPUHealthy`.
    #[serde(rename = "type")]
    pub condition_type: String,
    /// Default reason.
    pub reason: String,
    /// Default message.
    pub message: String,
}

impl ConditionDefinition {
    /// Creates a condition definition.
    pub fn new(condition_type: impl Into<String>, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            condition_type: condition_type.into(),
            reason: reason.into(),
            message: message.into(),
        }
    }
}

impl MonitorConfig {
    /// Creates a configuration for `source` talking to `socket_address`,
    /// with every tunable left at zero so that [`apply_defaults`](Self::apply_defaults)
    /// fills it in.
    pub fn new(source: impl Into<String>, socket_address: impl Into<String>) -> Self {
        Self {
            plugin: EXTERNAL_PLUGIN.to_string(),
            plugin_config: PluginConfig {
                socket_address: socket_address.into(),
                invoke_interval: Duration::ZERO,
                timeout: Duration::ZERO,
                skip_initial_status: false,
                retry_policy: RetryPolicy::default(),
                health_check: HealthCheckConfig::default(),
                plugin_parameters: HashMap::new(),
            },
            source: source.into(),
            metrics_reporting: false,
            conditions: Vec::new(),
        }
    }

    /// Parses a configuration from JSON text. Defaults are not applied.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse { message: e.to_string() })
    }

    /// Reads and parses a configuration file. Defaults are not applied.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json_str(&text)
    }

    /// Loads a file, applies defaults and validates: the full path a host
    /// takes before constructing a proxy.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    /// Fills zero/absent fields with their defaults.
    pub fn apply_defaults(&mut self) {
        let pc = &mut self.plugin_config;
        if pc.invoke_interval.is_zero() {
            pc.invoke_interval = defaults::INVOKE_INTERVAL;
        }
        if pc.timeout.is_zero() {
            pc.timeout = defaults::TIMEOUT;
        }

        let rp = &mut pc.retry_policy;
        if rp.max_attempts == 0 {
            rp.max_attempts = defaults::MAX_ATTEMPTS;
        }
        if rp.backoff_multiplier == 0.0 {
            rp.backoff_multiplier = defaults::BACKOFF_MULTIPLIER;
        }
        if rp.max_backoff.is_zero() {
            rp.max_backoff = defaults::MAX_BACKOFF;
        }
        if rp.initial_backoff.is_zero() {
            rp.initial_backoff = defaults::INITIAL_BACKOFF;
        }

        let hc = &mut pc.health_check;
        if hc.interval.is_zero() {
            hc.interval = defaults::HEALTH_INTERVAL;
        }
        if hc.timeout.is_zero() {
            hc.timeout = defaults::HEALTH_TIMEOUT;
        }
        if hc.error_threshold == 0 {
            hc.error_threshold = defaults::ERROR_THRESHOLD;
        }

        self.metrics_reporting = true;
    }

    /// Checks every invariant; the first violation wins.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.plugin != EXTERNAL_PLUGIN {
            return Err(ConfigError::InvalidPlugin { got: self.plugin.clone() });
        }
        if self.source.is_empty() {
            return Err(ConfigError::MissingField { field: "source".to_string() });
        }

        let pc = &self.plugin_config;
        if pc.socket_address.is_empty() {
            return Err(ConfigError::MissingField {
                field: "pluginConfig.socketAddress".to_string(),
            });
        }
        if pc.invoke_interval < MIN_INTERVAL {
            return Err(ConfigError::IntervalTooShort { actual: pc.invoke_interval });
        }
        if pc.timeout < MIN_INTERVAL {
            return Err(ConfigError::TimeoutTooShort { actual: pc.timeout });
        }
        if pc.timeout >= pc.invoke_interval {
            return Err(ConfigError::TimeoutNotBelowInterval {
                timeout: pc.timeout,
                interval: pc.invoke_interval,
            });
        }

        if pc.retry_policy.max_attempts < 1 {
            return Err(ConfigError::MaxAttemptsTooLow);
        }
        // NaN fails this comparison too.
        if !(pc.retry_policy.backoff_multiplier >= 1.0) {
            return Err(ConfigError::MultiplierTooLow {
                actual: pc.retry_policy.backoff_multiplier,
            });
        }

        if pc.health_check.error_threshold < 1 {
            return Err(ConfigError::ErrorThresholdTooLow);
        }
        if pc.health_check.interval.is_zero() {
            return Err(ConfigError::HealthIntervalZero);
        }

        for (index, condition) in self.conditions.iter().enumerate() {
            let missing = if condition.condition_type.is_empty() {
                Some("type")
            } else if condition.reason.is_empty() {
                Some("reason")
            } else if condition.message.is_empty() {
                Some("message")
            } else {
                None
            };
            if let Some(field) = missing {
                return Err(ConfigError::IncompleteCondition { index, field });
            }
        }

        Ok(())
    }

    /// Status poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.plugin_config.invoke_interval
    }

    /// Deadline of each status call.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        self.plugin_config.timeout
    }

    /// Health-probe cadence.
    #[must_use]
    pub const fn health_probe_interval(&self) -> Duration {
        self.plugin_config.health_check.interval
    }

    /// Timeout of probe-class calls.
    #[must_use]
    pub const fn health_probe_timeout(&self) -> Duration {
        self.plugin_config.health_check.timeout
    }

    /// Consecutive errors that force a reconnection.
    #[must_use]
    pub const fn error_threshold(&self) -> u32 {
        self.plugin_config.health_check.error_threshold
    }
}
