//! Plugin transport layer.
//!
//! The proxy talks to a plugin through two seams: a [`PluginConnector`]
//! opens sessions, and a [`PluginSession`] carries the three RPC operations
//! plus a local liveness probe. Backends:
//! - [`grpc::GrpcConnector`]: tonic over a Unix domain socket (production)
//! - [`memory::InMemoryConnector`]: in-process handler (embedding and tests)

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CallError, ConnectError};

pub mod convert;
pub mod grpc;
pub mod memory;

/// Generated wire types and client/server stubs.
#[allow(missing_docs, clippy::all, clippy::pedantic)]
pub mod proto {
    tonic::include_proto!("external.v1");
}

pub use grpc::GrpcConnector;
pub use memory::{InMemoryConnector, PluginHandler};

/// RPC operation names, used in errors and logs.
pub mod ops {
    /// Status poll.
    pub const CHECK_HEALTH: &str = "CheckHealth";
    /// Identity fetch.
    pub const GET_METADATA: &str = "GetMetadata";
    /// Shutdown notification.
    pub const STOP: &str = "Stop";
}

/// Channel state as seen locally, without a remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Connected, no call has completed yet.
    Idle,
    /// The last call reached the plugin.
    Ready,
    /// The last call could not reach the plugin.
    TransientFailure,
    /// Closed locally.
    Shutdown,
}

impl ChannelState {
    /// Ready or idle: worth sending calls to.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Ready | Self::Idle)
    }

    pub(crate) const fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Ready => 1,
            Self::TransientFailure => 2,
            Self::Shutdown => 3,
        }
    }

    pub(crate) const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Ready,
            2 => Self::TransientFailure,
            _ => Self::Shutdown,
        }
    }
}

/// Who the proxy is talking to, fetched once per successful connection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PluginIdentity {
    /// Monitor source identifier from the configuration.
    pub source: String,
    /// Endpoint the session was opened on.
    pub endpoint: String,
    /// Name the plugin reports for itself.
    pub name: String,
    /// Plugin version.
    pub version: String,
    /// RPC API version the plugin implements.
    pub api_version: String,
    /// Free-form description.
    pub description: String,
    /// Condition types the plugin may report.
    pub supported_conditions: Vec<String>,
    /// Declared capabilities.
    pub capabilities: BTreeMap<String, String>,
}

/// Opens sessions to a plugin endpoint.
pub trait PluginConnector: Send + Sync {
    /// Establishes a new session. Does not touch any previously opened one.
    fn open(&self, endpoint: &Path) -> Result<Arc<dyn PluginSession>, ConnectError>;
}

/// One open channel to a plugin.
///
/// Every call carries a caller-side deadline and never blocks past it.
pub trait PluginSession: Send + Sync {
    /// Local liveness: ready or idle, not failed or shut down.
    fn is_live(&self) -> bool;

    /// Runs one health check.
    fn check_health(
        &self,
        request: proto::HealthCheckRequest,
        timeout: Duration,
    ) -> Result<proto::HealthStatus, CallError>;

    /// Fetches the plugin's self-description.
    fn get_metadata(&self, timeout: Duration) -> Result<proto::MonitorMetadata, CallError>;

    /// Asks the plugin to shut down.
    fn stop(&self, timeout: Duration) -> Result<(), CallError>;

    /// Releases the channel. Idempotent.
    fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_state_liveness() {
        assert!(ChannelState::Idle.is_live());
        assert!(ChannelState::Ready.is_live());
        assert!(!ChannelState::TransientFailure.is_live());
        assert!(!ChannelState::Shutdown.is_live());
    }
}
