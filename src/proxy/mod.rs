//! The resilient proxy from the host to one external health-check plugin.
//!
//! A [`MonitorProxy`] runs two background threads once started:
//! - the status loop polls `CheckHealth` every `invoke_interval` and
//!   forwards changed statuses to a bounded [`StatusStream`];
//! - the health loop checks liveness every `healthCheck.interval` and
//!   drives reconnection with exponential backoff.
//!
//! Neither loop ever surfaces an error to the host. Failures are absorbed
//! into the connection state and logged.

pub mod backoff;
pub mod classify;
mod connection;
mod poller;
pub mod state;
mod stream;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Sender};
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::error::{ProxyError, ProxyResult};
use crate::transport::{GrpcConnector, PluginConnector, PluginIdentity};

pub use classify::Classification;
pub use connection::RECONNECT_DEBOUNCE;
pub use state::ConnectionState;
pub use stream::StatusStream;

use connection::ProxyCore;
use poller::StatusPoller;

/// Capacity of the outbound status queue.
pub const STATUS_CHANNEL_CAPACITY: usize = 1000;

/// Deadline of the shutdown notification sent on `stop()`.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Client-side proxy for one external monitor plugin.
pub struct MonitorProxy {
    core: Arc<ProxyCore>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl std::fmt::Debug for MonitorProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorProxy")
            .field("name", &self.core.name)
            .field("state", &self.core.connection_state())
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl MonitorProxy {
    /// Validates `config` and builds an idle proxy over `connector`.
    ///
    /// Defaults are expected to have been applied already; see
    /// [`MonitorConfig::load`].
    pub fn new(config: MonitorConfig, connector: Arc<dyn PluginConnector>) -> ProxyResult<Self> {
        config.validate()?;

        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let core = ProxyCore::new(Arc::new(config), connector, shutdown_rx);
        Ok(Self {
            core: Arc::new(core),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            workers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    /// Builds a proxy that talks gRPC over the configured Unix socket.
    pub fn with_grpc(config: MonitorConfig) -> ProxyResult<Self> {
        config.validate()?;
        let connector = GrpcConnector::new()?.with_connect_timeout(config.health_probe_timeout());
        Self::new(config, Arc::new(connector))
    }

    /// Monitor name (the configured source).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// The validated configuration.
    #[must_use]
    pub fn config(&self) -> &MonitorConfig {
        &self.core.config
    }

    /// Connects on a best-effort basis and launches both loops.
    ///
    /// A plugin that is not up yet is not an error: the health loop keeps
    /// trying in the background. A proxy can be started once.
    pub fn start(&self) -> ProxyResult<StatusStream> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(ProxyError::AlreadyStarted {
                name: self.core.name.clone(),
            });
        }
        info!(
            monitor = %self.core.name,
            endpoint = %self.core.config.plugin_config.socket_address,
            "Starting external monitor"
        );

        if let Err(err) = self.core.connect() {
            warn!(monitor = %self.core.name, error = %err, "Initial connection failed, retrying in background");
        }

        let (tx, rx) = bounded(STATUS_CHANNEL_CAPACITY);
        let poller = StatusPoller::new(Arc::clone(&self.core), tx);
        let spawned = self
            .spawn_worker(format!("monitor-status-{}", self.core.name), move || poller.run())
            .and_then(|()| {
                let core = Arc::clone(&self.core);
                self.spawn_worker(format!("monitor-health-{}", self.core.name), move || health_loop(&core))
            });

        if let Err(err) = spawned {
            self.stop();
            return Err(err);
        }
        Ok(StatusStream::new(rx))
    }

    fn spawn_worker(&self, name: String, body: impl FnOnce() + Send + 'static) -> ProxyResult<()> {
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(body)
            .map_err(|e| ProxyError::Spawn {
                worker: name,
                message: e.to_string(),
            })?;
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
        Ok(())
    }

    /// Notifies the plugin, stops both loops and closes the session.
    ///
    /// Idempotent; a proxy that was never started has nothing to stop.
    pub fn stop(&self) {
        if !self.started.load(Ordering::Acquire) || self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(monitor = %self.core.name, "Stopping external monitor");

        if let Some(session) = self.core.live_session() {
            if let Err(err) = session.stop(STOP_TIMEOUT) {
                debug!(monitor = %self.core.name, error = %err, "Stop notification failed");
            }
        }

        // Disconnecting the shutdown channel wakes both loops and any
        // in-flight backoff sleep.
        drop(self.shutdown_tx.lock().unwrap_or_else(PoisonError::into_inner).take());

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in workers {
            let worker = handle.thread().name().unwrap_or("monitor-worker").to_string();
            if handle.join().is_err() {
                warn!(monitor = %self.core.name, worker = %worker, "Worker panicked");
            }
        }

        self.core.close_session();
        info!(monitor = %self.core.name, "External monitor stopped");
    }

    /// Snapshot of the connection bookkeeping.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.core.connection_state()
    }

    /// Whether the proxy currently holds a live session.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    /// Identity reported by the plugin on the current connection, if it
    /// answered `GetMetadata`.
    #[must_use]
    pub fn identity(&self) -> Option<PluginIdentity> {
        self.core.identity()
    }

    /// Sequence number of the last poll sent.
    #[must_use]
    pub fn sequence(&self) -> i64 {
        self.core.sequence()
    }

    /// Statuses dropped because the stream was full or gone.
    #[must_use]
    pub fn dropped_statuses(&self) -> u64 {
        self.core.dropped_statuses()
    }
}

impl Drop for MonitorProxy {
    fn drop(&mut self) {
        self.stop();
    }
}

fn health_loop(core: &ProxyCore) {
    let ticker = tick(core.config.health_probe_interval());
    debug!(monitor = %core.name, interval = ?core.config.health_probe_interval(), "Health loop started");

    loop {
        select! {
            recv(ticker) -> _ => {
                if !core.is_connected() {
                    let outcome = core.attempt_reconnection();
                    debug!(monitor = %core.name, ?outcome, "Health check found plugin disconnected");
                }
            }
            recv(core.shutdown) -> _ => break,
        }
    }
    debug!(monitor = %core.name, "Health loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::ConditionDefinition;
    use crate::error::ConfigError;
    use crate::transport::proto::HealthStatus;
    use crate::transport::{InMemoryConnector, PluginHandler};

    use super::connection::testing::{test_config, ScriptedPlugin};

    fn connector() -> (Arc<ScriptedPlugin>, Arc<InMemoryConnector>) {
        let plugin = ScriptedPlugin::new(|_| Ok(HealthStatus::default()));
        let connector = Arc::new(InMemoryConnector::new(Arc::clone(&plugin) as Arc<dyn PluginHandler>));
        (plugin, connector)
    }

    #[test]
    fn invalid_config_builds_no_proxy() {
        let (_, connector) = connector();
        let mut config = test_config(std::path::Path::new("/tmp/unused.sock"));
        config.plugin_config.timeout = config.plugin_config.invoke_interval;

        let err = MonitorProxy::new(config, connector).unwrap_err();
        assert!(matches!(
            err,
            ProxyError::Config(ConfigError::TimeoutNotBelowInterval { .. })
        ));
    }

    #[test]
    fn start_twice_fails() {
        let (_, connector) = connector();
        let config = test_config(std::path::Path::new("/tmp/unused.sock"));
        let proxy = MonitorProxy::new(config, connector).unwrap();

        let _stream = proxy.start().unwrap();
        assert!(matches!(proxy.start(), Err(ProxyError::AlreadyStarted { .. })));
        proxy.stop();
    }

    #[test]
    fn stop_is_idempotent_and_notifies_once() {
        let (plugin, connector) = connector();
        let mut config = test_config(std::path::Path::new("/tmp/unused.sock"));
        config.conditions.push(ConditionDefinition::new("Ready", "Starting", "plugin starting"));
        let proxy = MonitorProxy::new(config, Arc::clone(&connector) as Arc<dyn PluginConnector>).unwrap();

        let stream = proxy.start().unwrap();
        assert!(proxy.is_connected());
        let initial = stream.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(initial.conditions.len(), 1);

        proxy.stop();
        proxy.stop();
        assert_eq!(plugin.stops.load(Ordering::Acquire), 1);
        assert!(!proxy.is_connected());
        assert_eq!(connector.closed_count(), 1);
        assert!(matches!(stream.recv(), Err(ProxyError::StreamClosed)));
    }

    #[test]
    fn stop_before_start_is_a_no_op() {
        let (plugin, connector) = connector();
        let proxy = MonitorProxy::new(test_config(std::path::Path::new("/tmp/unused.sock")), connector).unwrap();
        proxy.stop();
        assert_eq!(plugin.stops.load(Ordering::Acquire), 0);
        drop(proxy);
    }

    #[test]
    fn dropping_a_started_proxy_stops_it() {
        let (plugin, connector) = connector();
        let proxy = MonitorProxy::new(test_config(std::path::Path::new("/tmp/unused.sock")), connector).unwrap();
        let stream = proxy.start().unwrap();
        drop(proxy);

        assert_eq!(plugin.stops.load(Ordering::Acquire), 1);
        assert!(matches!(stream.recv(), Err(ProxyError::StreamClosed)));
    }

    #[test]
    fn introspection_reports_identity() {
        let (_, connector) = connector();
        let proxy = MonitorProxy::new(test_config(std::path::Path::new("/tmp/unused.sock")), connector).unwrap();
        assert_eq!(proxy.name(), "test-monitor");
        assert!(proxy.identity().is_none());

        let _stream = proxy.start().unwrap();
        let identity = proxy.identity().unwrap();
        assert_eq!(identity.name, "scripted");
        assert_eq!(identity.endpoint, "/tmp/unused.sock");
        assert_eq!(proxy.dropped_statuses(), 0);
        assert!(proxy.connection_state().connected);
        proxy.stop();
    }
}
