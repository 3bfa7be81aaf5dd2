//! Connection lifecycle shared by the status loop, the health loop and the
//! public `stop()` caller.
//!
//! All session and bookkeeping mutation goes through one `RwLock`. The
//! reconnection procedure releases it while sleeping the backoff delay, so
//! a pending retry never stalls the status loop's liveness reads.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, error, info, warn};

use super::backoff;
use super::classify::{classify, Classification};
use super::state::{ConnectionSlot, ConnectionState};
use crate::config::MonitorConfig;
use crate::error::{CallError, ConnectError};
use crate::transport::{convert, PluginConnector, PluginIdentity, PluginSession};

/// Minimum spacing between reconnection attempts.
pub const RECONNECT_DEBOUNCE: Duration = Duration::from_secs(1);

/// What a reconnection attempt ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReconnectOutcome {
    Debounced,
    InProgress,
    GaveUp,
    Interrupted,
    EndpointMissing,
    Failed,
    Connected,
}

pub(crate) struct ProxyCore {
    pub(crate) name: String,
    pub(crate) config: Arc<MonitorConfig>,
    endpoint: PathBuf,
    connector: Arc<dyn PluginConnector>,
    slot: RwLock<ConnectionSlot>,
    sequence: AtomicI64,
    dropped_statuses: AtomicU64,
    pub(crate) shutdown: Receiver<()>,
}

/// Clears the in-flight marker however the attempt ends.
struct ReconnectGuard<'a>(&'a ProxyCore);

impl Drop for ReconnectGuard<'_> {
    fn drop(&mut self) {
        self.0.write_slot().reconnecting = false;
    }
}

impl ProxyCore {
    pub(crate) fn new(
        config: Arc<MonitorConfig>,
        connector: Arc<dyn PluginConnector>,
        shutdown: Receiver<()>,
    ) -> Self {
        Self {
            name: config.source.clone(),
            endpoint: PathBuf::from(&config.plugin_config.socket_address),
            config,
            connector,
            slot: RwLock::new(ConnectionSlot::default()),
            sequence: AtomicI64::new(0),
            dropped_statuses: AtomicU64::new(0),
            shutdown,
        }
    }

    fn read_slot(&self) -> RwLockReadGuard<'_, ConnectionSlot> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write_slot(&self) -> RwLockWriteGuard<'_, ConnectionSlot> {
        self.slot.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.read_slot().is_connected()
    }

    pub(crate) fn live_session(&self) -> Option<Arc<dyn PluginSession>> {
        self.read_slot().live_session()
    }

    pub(crate) fn connection_state(&self) -> ConnectionState {
        self.read_slot().state
    }

    pub(crate) fn identity(&self) -> Option<PluginIdentity> {
        self.read_slot().identity.clone()
    }

    /// Increments and returns the sequence number for the next poll.
    pub(crate) fn next_sequence(&self) -> i64 {
        self.sequence.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn sequence(&self) -> i64 {
        self.sequence.load(Ordering::Acquire)
    }

    pub(crate) fn record_dropped_status(&self) -> u64 {
        self.dropped_statuses.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn dropped_statuses(&self) -> u64 {
        self.dropped_statuses.load(Ordering::Relaxed)
    }

    /// Opens a fresh session, replacing any prior one.
    pub(crate) fn connect(&self) -> Result<(), ConnectError> {
        let mut slot = self.write_slot();
        self.connect_locked(&mut slot)
    }

    fn connect_locked(&self, slot: &mut ConnectionSlot) -> Result<(), ConnectError> {
        slot.close_session();
        let session = self.connector.open(&self.endpoint)?;
        slot.install(Arc::clone(&session));
        info!(monitor = %self.name, endpoint = %self.endpoint.display(), "Connected to external monitor");

        match session.get_metadata(self.config.health_probe_timeout()) {
            Ok(metadata) => {
                let identity = convert::identity_from_wire(
                    &self.config.source,
                    &self.config.plugin_config.socket_address,
                    metadata,
                );
                info!(
                    monitor = %self.name,
                    version = %identity.version,
                    api_version = %identity.api_version,
                    "External monitor metadata"
                );
                slot.identity = Some(identity);
            }
            Err(err) if classify(&err) == Classification::Unsupported => {
                debug!(monitor = %self.name, "Plugin does not serve metadata");
            }
            Err(err) => {
                warn!(monitor = %self.name, error = %err, "Failed to fetch metadata");
            }
        }
        Ok(())
    }

    /// Closes the current session, if any.
    pub(crate) fn close_session(&self) {
        self.write_slot().close_session();
    }

    /// Resets the error streak after a successful remote call.
    pub(crate) fn record_call_success(&self) {
        let mut slot = self.write_slot();
        slot.state.consecutive_errors = 0;
    }

    /// Classifies a failed call, updates the bookkeeping, and forces a
    /// reconnection once the error threshold is reached.
    pub(crate) fn handle_call_error(&self, err: &CallError) -> Classification {
        let class = classify(err);
        match class {
            Classification::Transient => {
                debug!(monitor = %self.name, operation = err.operation, error = %err, "Transient error");
            }
            Classification::Unsupported => {
                info!(monitor = %self.name, operation = err.operation, "Operation not implemented by plugin");
            }
            Classification::Other => {
                warn!(monitor = %self.name, operation = err.operation, error = %err, "Remote call failed");
            }
        }
        if !class.counts_as_error() {
            return class;
        }

        let errors = {
            let mut slot = self.write_slot();
            if class.marks_disconnected() {
                slot.state.connected = false;
            }
            slot.state.consecutive_errors = slot.state.consecutive_errors.saturating_add(1);
            slot.state.consecutive_errors
        };

        if errors >= self.config.error_threshold() {
            warn!(monitor = %self.name, errors, "Too many consecutive errors, triggering reconnection");
            self.attempt_reconnection();
        }
        class
    }

    /// One reconnection attempt with exponential backoff.
    ///
    /// There is no automatic reset once `max_attempts` is exhausted; only a
    /// successful connection clears the attempt counter.
    pub(crate) fn attempt_reconnection(&self) -> ReconnectOutcome {
        let policy = &self.config.plugin_config.retry_policy;

        let (attempt, delay) = {
            let mut slot = self.write_slot();
            if slot.reconnecting {
                return ReconnectOutcome::InProgress;
            }

            let now = Instant::now();
            if slot
                .state
                .last_attempt
                .is_some_and(|last| now.duration_since(last) < RECONNECT_DEBOUNCE)
            {
                return ReconnectOutcome::Debounced;
            }
            slot.state.last_attempt = Some(now);

            if backoff::should_give_up(slot.state.backoff_attempt, policy) {
                if slot.gave_up {
                    debug!(monitor = %self.name, "Reconnection abandoned");
                } else {
                    slot.gave_up = true;
                    error!(
                        monitor = %self.name,
                        attempts = slot.state.backoff_attempt,
                        "Giving up reconnection"
                    );
                }
                return ReconnectOutcome::GaveUp;
            }

            let delay = backoff::next_delay(slot.state.backoff_attempt, policy);
            slot.state.backoff_attempt += 1;
            slot.reconnecting = true;
            (slot.state.backoff_attempt, delay)
        };
        let _guard = ReconnectGuard(self);

        info!(
            monitor = %self.name,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Attempting reconnection"
        );

        // Nothing is ever sent on the shutdown channel; it disconnects on stop.
        match self.shutdown.recv_timeout(delay) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return ReconnectOutcome::Interrupted,
        }

        if let Err(err) = std::fs::metadata(&self.endpoint) {
            debug!(
                monitor = %self.name,
                endpoint = %self.endpoint.display(),
                error = %err,
                "Socket not available"
            );
            return ReconnectOutcome::EndpointMissing;
        }

        let mut slot = self.write_slot();
        match self.connect_locked(&mut slot) {
            Ok(()) => {
                info!(monitor = %self.name, "Successfully reconnected");
                ReconnectOutcome::Connected
            }
            Err(err) => {
                warn!(monitor = %self.name, error = %err, "Reconnection failed");
                ReconnectOutcome::Failed
            }
        }
    }
}
