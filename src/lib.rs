//! # plugin-proxy
//!
//! Client-side proxy from a host monitoring daemon to out-of-process
//! health-check plugins speaking gRPC over a Unix domain socket.
//!
//! The host loads a [`MonitorConfig`], builds a [`MonitorProxy`] and starts
//! it. The proxy polls the plugin on a fixed interval and forwards changed
//! statuses on a bounded [`StatusStream`]. It survives plugin restarts with
//! debounced, exponentially backed-off reconnection.
//!
//! ## Core Concepts
//!
//! - **Status**: a source, point-in-time events and persistent conditions
//! - **Connector / Session**: the transport seam; gRPC in production,
//!   in-memory for embedding and tests
//! - **Registry**: the host's name → factory map of monitor kinds
//!
//! ## Usage
//!
//! ```rust,ignore
//! use plugin_proxy::{MonitorConfig, MonitorProxy};
//!
//! let config = MonitorConfig::load("/etc/npd/gpu-monitor.json")?;
//! let proxy = MonitorProxy::with_grpc(config)?;
//! let statuses = proxy.start()?;
//! for status in statuses.iter() {
//!     println!("{}: {} conditions", status.source, status.conditions.len());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod proxy;
pub mod registry;
pub mod status;
pub mod transport;

pub use config::{ConditionDefinition, HealthCheckConfig, MonitorConfig, PluginConfig, RetryPolicy};
pub use error::{CallError, ConfigError, ConnectError, ProxyError, ProxyResult};
pub use proxy::{Classification, ConnectionState, MonitorProxy, StatusStream};
pub use registry::{
    register_external_monitor, Monitor, MonitorHandler, MonitorRegistry, RegistryError,
    EXTERNAL_MONITOR_NAME,
};
pub use status::{Condition, ConditionStatus, Event, Severity, Status};
pub use transport::{
    ChannelState, GrpcConnector, InMemoryConnector, PluginConnector, PluginHandler, PluginIdentity,
    PluginSession,
};
