//! Error types for the plugin proxy.
//!
//! All errors are strongly typed using thiserror. Only configuration
//! failures surface synchronously to the host; everything a background
//! loop hits is absorbed into connection state and logs.

use std::time::Duration;

use thiserror::Error;

/// Configuration errors: fatal at construction, never retried.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("plugin must be \"external\", got {got:?}")]
    InvalidPlugin {
        got: String,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("invoke_interval must be at least 1 second, got {actual:?}")]
    IntervalTooShort {
        actual: Duration,
    },

    #[error("timeout must be at least 1 second, got {actual:?}")]
    TimeoutTooShort {
        actual: Duration,
    },

    #[error("timeout ({timeout:?}) must be less than invoke_interval ({interval:?})")]
    TimeoutNotBelowInterval {
        timeout: Duration,
        interval: Duration,
    },

    #[error("retryPolicy.maxAttempts must be at least 1")]
    MaxAttemptsTooLow,

    #[error("retryPolicy.backoffMultiplier must be at least 1.0, got {actual}")]
    MultiplierTooLow {
        actual: f64,
    },

    #[error("healthCheck.errorThreshold must be at least 1")]
    ErrorThresholdTooLow,

    #[error("healthCheck.interval must be non-zero")]
    HealthIntervalZero,

    #[error("condition[{index}].{field} is required")]
    IncompleteCondition {
        index: usize,
        field: &'static str,
    },

    #[error("Invalid duration {input:?}: {reason}")]
    InvalidDuration {
        input: String,
        reason: String,
    },

    #[error("Failed to read config file {path}: {message}")]
    Read {
        path: String,
        message: String,
    },

    #[error("Failed to parse configuration: {message}")]
    Parse {
        message: String,
    },
}

/// Endpoint unreachable at open time. Non-fatal: background reconnection
/// governs recovery.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("Endpoint {endpoint} does not exist")]
    EndpointMissing {
        endpoint: String,
    },

    #[error("Failed to connect to {endpoint}: {message}")]
    Unreachable {
        endpoint: String,
        message: String,
    },

    #[error("Transport runtime error: {message}")]
    Runtime {
        message: String,
    },
}

/// A failed remote call, tagged with the gRPC status code that the
/// error classifier maps to an action.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{operation} failed ({code:?}): {message}")]
pub struct CallError {
    /// RPC operation name, e.g. `CheckHealth`.
    pub operation: &'static str,
    /// Status code reported by the transport or the plugin.
    pub code: tonic::Code,
    /// Human-readable detail.
    pub message: String,
}

impl CallError {
    /// Creates a call error from a code and message.
    #[must_use]
    pub fn new(operation: &'static str, code: tonic::Code, message: impl Into<String>) -> Self {
        Self {
            operation,
            code,
            message: message.into(),
        }
    }

    /// Wraps a gRPC status returned by the plugin or the channel.
    #[must_use]
    pub fn from_status(operation: &'static str, status: &tonic::Status) -> Self {
        Self::new(operation, status.code(), status.message())
    }

    /// The caller-side deadline expired before the plugin answered.
    #[must_use]
    pub fn deadline_exceeded(operation: &'static str, timeout: Duration) -> Self {
        Self::new(
            operation,
            tonic::Code::DeadlineExceeded,
            format!("no response within {}ms", timeout.as_millis()),
        )
    }
}

/// Top-level error type for the plugin proxy.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection error: {0}")]
    Connect(#[from] ConnectError),

    #[error("Call error: {0}")]
    Call(#[from] CallError),

    #[error("Registry error: {0}")]
    Registry(#[from] crate::registry::RegistryError),

    #[error("Monitor {name} was already started")]
    AlreadyStarted {
        name: String,
    },

    #[error("Failed to spawn worker {worker}: {message}")]
    Spawn {
        worker: String,
        message: String,
    },

    #[error("Status stream closed")]
    StreamClosed,

    #[error("No status received within {duration_ms}ms")]
    StreamTimeout {
        duration_ms: u64,
    },
}

impl ProxyError {
    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true if retrying later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Connect(_) | Self::StreamTimeout { .. } => true,
            Self::Call(e) => matches!(
                e.code,
                tonic::Code::Unavailable | tonic::Code::DeadlineExceeded
            ),
            _ => false,
        }
    }
}

/// Result type alias for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;
