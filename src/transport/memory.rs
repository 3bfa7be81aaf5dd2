//! In-process transport backend.
//!
//! Sessions dispatch straight into a [`PluginHandler`]. The connector can be
//! made unreachable and its sessions severed, which lets hosts embed a plugin
//! without a socket and lets tests script connection failures.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::proto::{HealthCheckRequest, HealthStatus, MonitorMetadata};
use super::{ops, ChannelState, PluginConnector, PluginSession};
use crate::error::{CallError, ConnectError};

/// Server side of an in-process plugin.
pub trait PluginHandler: Send + Sync {
    /// Handles one health check.
    fn check_health(&self, request: &HealthCheckRequest) -> Result<HealthStatus, tonic::Status>;

    /// Describes the plugin.
    fn get_metadata(&self) -> Result<MonitorMetadata, tonic::Status> {
        Err(tonic::Status::unimplemented("GetMetadata is not implemented"))
    }

    /// Shutdown notification.
    fn stop(&self) -> Result<(), tonic::Status> {
        Ok(())
    }
}

/// Connector whose sessions call a [`PluginHandler`] directly.
pub struct InMemoryConnector {
    handler: Arc<dyn PluginHandler>,
    reachable: AtomicBool,
    opened: AtomicUsize,
    sessions: Mutex<Vec<Arc<InMemorySession>>>,
}

impl InMemoryConnector {
    /// Creates a reachable connector.
    pub fn new(handler: Arc<dyn PluginHandler>) -> Self {
        Self {
            handler,
            reachable: AtomicBool::new(true),
            opened: AtomicUsize::new(0),
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Makes subsequent `open` calls succeed or fail.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Release);
    }

    /// Number of sessions opened so far.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::Acquire)
    }

    /// Puts every open session into transient failure, as if the plugin
    /// process died.
    pub fn sever(&self) {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        for session in sessions.iter() {
            session.set_state(ChannelState::TransientFailure);
        }
    }

    /// Number of sessions that have been closed.
    #[must_use]
    pub fn closed_count(&self) -> usize {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.iter().filter(|s| s.state() == ChannelState::Shutdown).count()
    }
}

impl PluginConnector for InMemoryConnector {
    fn open(&self, endpoint: &Path) -> Result<Arc<dyn PluginSession>, ConnectError> {
        if !self.reachable.load(Ordering::Acquire) {
            return Err(ConnectError::Unreachable {
                endpoint: endpoint.display().to_string(),
                message: "in-memory plugin is unreachable".to_string(),
            });
        }

        let session = Arc::new(InMemorySession {
            handler: Arc::clone(&self.handler),
            state: AtomicU8::new(ChannelState::Idle.as_u8()),
        });
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&session));
        self.opened.fetch_add(1, Ordering::AcqRel);
        Ok(session)
    }
}

/// A session bound to an in-process handler.
pub struct InMemorySession {
    handler: Arc<dyn PluginHandler>,
    state: AtomicU8,
}

impl InMemorySession {
    fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, next: ChannelState) {
        let _ = self.state.fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
            (ChannelState::from_u8(cur) != ChannelState::Shutdown).then_some(next.as_u8())
        });
    }

    fn dispatch<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&dyn PluginHandler) -> Result<T, tonic::Status>,
    ) -> Result<T, CallError> {
        match self.state() {
            ChannelState::Shutdown => {
                return Err(CallError::new(operation, tonic::Code::Unavailable, "session closed"));
            }
            ChannelState::TransientFailure => {
                return Err(CallError::new(operation, tonic::Code::Unavailable, "connection severed"));
            }
            ChannelState::Idle | ChannelState::Ready => {}
        }

        match f(self.handler.as_ref()) {
            Ok(value) => {
                self.set_state(ChannelState::Ready);
                Ok(value)
            }
            Err(status) => {
                if status.code() == tonic::Code::Unavailable {
                    self.set_state(ChannelState::TransientFailure);
                }
                Err(CallError::from_status(operation, &status))
            }
        }
    }
}

impl PluginSession for InMemorySession {
    fn is_live(&self) -> bool {
        self.state().is_live()
    }

    // In-process calls complete synchronously; the deadline cannot be exceeded.
    fn check_health(&self, request: HealthCheckRequest, _timeout: Duration) -> Result<HealthStatus, CallError> {
        self.dispatch(ops::CHECK_HEALTH, |h| h.check_health(&request))
    }

    fn get_metadata(&self, _timeout: Duration) -> Result<MonitorMetadata, CallError> {
        self.dispatch(ops::GET_METADATA, |h| h.get_metadata())
    }

    fn stop(&self, _timeout: Duration) -> Result<(), CallError> {
        self.dispatch(ops::STOP, |h| h.stop())
    }

    fn close(&self) {
        self.state.store(ChannelState::Shutdown.as_u8(), Ordering::Release);
    }
}
