//! Host-owned registry of monitor kinds.
//!
//! The host builds a [`MonitorRegistry`], registers the kinds it supports
//! (see [`register_external_monitor`]) and creates monitors from config file
//! paths at runtime.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::config::MonitorConfig;
use crate::error::ProxyResult;
use crate::proxy::{MonitorProxy, StatusStream};
use crate::transport::PluginConnector;

/// Name under which the external plugin proxy registers.
pub const EXTERNAL_MONITOR_NAME: &str = "external-monitor";

/// A problem monitor the host can run.
pub trait Monitor: std::fmt::Debug + Send + Sync {
    /// Starts monitoring and returns the status stream.
    fn start(&self) -> ProxyResult<StatusStream>;

    /// Stops monitoring. Safe to call more than once.
    fn stop(&self);
}

impl Monitor for MonitorProxy {
    fn start(&self) -> ProxyResult<StatusStream> {
        Self::start(self)
    }

    fn stop(&self) {
        Self::stop(self);
    }
}

/// Builds a monitor from a config file path.
pub type CreateMonitor = Arc<dyn Fn(&Path) -> ProxyResult<Box<dyn Monitor>> + Send + Sync>;

/// Registry errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Monitor {name:?} is already registered")]
    DuplicateMonitor {
        name: String,
    },

    #[error("No monitor registered under {name:?}")]
    UnknownMonitor {
        name: String,
    },
}

/// How to build one kind of monitor.
#[derive(Clone)]
pub struct MonitorHandler {
    /// Factory taking a config file path.
    pub create: CreateMonitor,
    /// Help text for the command-line option that lists config paths.
    pub option_description: String,
}

impl std::fmt::Debug for MonitorHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorHandler")
            .field("option_description", &self.option_description)
            .finish_non_exhaustive()
    }
}

/// Name → handler map.
#[derive(Debug, Default, Clone)]
pub struct MonitorRegistry {
    handlers: BTreeMap<String, MonitorHandler>,
}

impl MonitorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `name`.
    pub fn register(&mut self, name: impl Into<String>, handler: MonitorHandler) -> Result<(), RegistryError> {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            return Err(RegistryError::DuplicateMonitor { name });
        }
        self.handlers.insert(name, handler);
        Ok(())
    }

    /// Builds a monitor of kind `name` from `config_path`.
    pub fn create(&self, name: &str, config_path: impl AsRef<Path>) -> ProxyResult<Box<dyn Monitor>> {
        let handler = self.handlers.get(name).ok_or_else(|| RegistryError::UnknownMonitor {
            name: name.to_string(),
        })?;
        (handler.create)(config_path.as_ref())
    }

    /// Registered handler for `name`.
    #[must_use]
    pub fn handler(&self, name: &str) -> Option<&MonitorHandler> {
        self.handlers.get(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

/// Registers the gRPC-backed external monitor as `"external-monitor"`.
pub fn register_external_monitor(registry: &mut MonitorRegistry) -> Result<(), RegistryError> {
    registry.register(
        EXTERNAL_MONITOR_NAME,
        MonitorHandler {
            create: Arc::new(|path: &Path| create_external_monitor(path).map(|m| Box::new(m) as Box<dyn Monitor>)),
            option_description: "Set to external monitor config file paths.".to_string(),
        },
    )
}

/// Loads, defaults and validates the config at `path`, then builds a
/// gRPC-backed proxy.
pub fn create_external_monitor(path: &Path) -> ProxyResult<MonitorProxy> {
    info!(config = %path.display(), "Creating external monitor");
    let config = MonitorConfig::load(path)?;
    let proxy = MonitorProxy::with_grpc(config)?;
    info!(
        monitor = %proxy.name(),
        socket = %proxy.config().plugin_config.socket_address,
        "Created external monitor"
    );
    Ok(proxy)
}

/// Same as [`create_external_monitor`] but over a caller-supplied transport.
pub fn create_external_monitor_with(
    path: &Path,
    connector: Arc<dyn PluginConnector>,
) -> ProxyResult<MonitorProxy> {
    let config = MonitorConfig::load(path)?;
    MonitorProxy::new(config, connector)
}
