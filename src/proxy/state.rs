//! Connection bookkeeping shared by both loops.

use std::sync::Arc;
use std::time::Instant;

use crate::transport::{PluginIdentity, PluginSession};

/// Snapshot of the proxy's connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionState {
    /// Whether the proxy considers the plugin reachable.
    pub connected: bool,
    /// When the last reconnection attempt started.
    pub last_attempt: Option<Instant>,
    /// Consecutive failed (re)connection tries since the last success.
    pub backoff_attempt: u32,
    /// Consecutive counted call errors since the last success.
    pub consecutive_errors: u32,
}

/// Everything guarded by the connection lock: the session, the identity it
/// produced, and the bookkeeping above.
#[derive(Default)]
pub(crate) struct ConnectionSlot {
    pub(crate) session: Option<Arc<dyn PluginSession>>,
    pub(crate) identity: Option<PluginIdentity>,
    pub(crate) state: ConnectionState,
    /// A reconnection attempt is sleeping or dialing.
    pub(crate) reconnecting: bool,
    /// Give-up has already been logged.
    pub(crate) gave_up: bool,
}

impl ConnectionSlot {
    /// Connected flag set and the session reports itself live.
    pub(crate) fn is_connected(&self) -> bool {
        self.state.connected && self.session.as_ref().is_some_and(|s| s.is_live())
    }

    /// The current session if the proxy is connected.
    pub(crate) fn live_session(&self) -> Option<Arc<dyn PluginSession>> {
        if self.is_connected() {
            self.session.clone()
        } else {
            None
        }
    }

    /// Closes and forgets the current session.
    pub(crate) fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
        }
        self.state.connected = false;
    }

    /// Installs a freshly opened session and resets the counters.
    pub(crate) fn install(&mut self, session: Arc<dyn PluginSession>) {
        self.close_session();
        self.session = Some(session);
        self.identity = None;
        self.state.connected = true;
        self.state.backoff_attempt = 0;
        self.state.consecutive_errors = 0;
        self.gave_up = false;
    }
}
