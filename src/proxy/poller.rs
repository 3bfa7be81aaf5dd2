//! Status loop: polls `CheckHealth` on a fixed tick and forwards changed
//! statuses to the bounded output queue.

use std::sync::Arc;

use chrono::Utc;
use crossbeam_channel::{select, tick, Sender, TrySendError};
use tracing::{debug, info, warn};

use super::connection::ProxyCore;
use crate::status::{should_emit, Status};
use crate::transport::{convert, proto};

/// Why a poll produced no emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollOutcome {
    NotConnected,
    CallFailed,
    Unchanged,
    Emitted,
    Dropped,
}

pub(crate) struct StatusPoller {
    core: Arc<ProxyCore>,
    tx: Sender<Status>,
    last_sent: Option<Status>,
}

impl StatusPoller {
    pub(crate) const fn new(core: Arc<ProxyCore>, tx: Sender<Status>) -> Self {
        Self {
            core,
            tx,
            last_sent: None,
        }
    }

    /// Runs until shutdown. Dropping `self` on return closes the stream.
    pub(crate) fn run(mut self) {
        let config = Arc::clone(&self.core.config);
        if !config.plugin_config.skip_initial_status {
            self.send_initial();
        }

        let ticker = tick(config.poll_interval());
        let shutdown = self.core.shutdown.clone();
        debug!(monitor = %self.core.name, interval = ?config.poll_interval(), "Status loop started");

        loop {
            select! {
                recv(ticker) -> _ => {
                    self.poll_once();
                }
                recv(shutdown) -> _ => break,
            }
        }
        debug!(monitor = %self.core.name, "Status loop stopped");
    }

    /// Emits the all-`False` status built from the declared conditions.
    pub(crate) fn send_initial(&mut self) {
        let config = &self.core.config;
        if config.conditions.is_empty() {
            return;
        }
        let status = Status::initial(&config.source, &config.conditions, Utc::now());
        info!(
            monitor = %self.core.name,
            conditions = status.conditions.len(),
            "Sending initial status"
        );
        self.emit(status);
    }

    /// One poll cycle.
    pub(crate) fn poll_once(&mut self) -> PollOutcome {
        let Some(session) = self.core.live_session() else {
            debug!(monitor = %self.core.name, "Skipping poll, not connected");
            return PollOutcome::NotConnected;
        };

        let config = &self.core.config;
        let request = proto::HealthCheckRequest {
            sequence: self.core.next_sequence(),
            parameters: config.plugin_config.plugin_parameters.clone(),
        };

        let reply = match session.check_health(request, config.call_timeout()) {
            Ok(reply) => reply,
            Err(err) => {
                self.core.handle_call_error(&err);
                return PollOutcome::CallFailed;
            }
        };
        self.core.record_call_success();

        let status = convert::status_from_wire(reply, Utc::now());
        if !should_emit(self.last_sent.as_ref(), &status) {
            return PollOutcome::Unchanged;
        }
        self.emit(status)
    }

    fn emit(&mut self, status: Status) -> PollOutcome {
        match self.tx.try_send(status.clone()) {
            Ok(()) => {
                self.last_sent = Some(status);
                PollOutcome::Emitted
            }
            Err(TrySendError::Full(_)) => {
                let dropped = self.core.record_dropped_status();
                warn!(monitor = %self.core.name, dropped, "Status channel full, dropping status");
                PollOutcome::Dropped
            }
            Err(TrySendError::Disconnected(_)) => {
                let dropped = self.core.record_dropped_status();
                debug!(monitor = %self.core.name, dropped, "Status receiver gone, dropping status");
                PollOutcome::Dropped
            }
        }
    }
}
