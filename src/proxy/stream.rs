use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};

use crate::error::{ProxyError, ProxyResult};
use crate::status::Status;

/// The host-facing end of a proxy's bounded status queue.
///
/// The stream closes once the proxy's status loop exits, i.e. after `stop()`.
#[derive(Debug, Clone)]
pub struct StatusStream {
    rx: Receiver<Status>,
}

impl StatusStream {
    pub(crate) const fn new(rx: Receiver<Status>) -> Self {
        Self { rx }
    }

    /// Receive the next status (blocking).
    pub fn recv(&self) -> ProxyResult<Status> {
        self.rx.recv().map_err(|_| ProxyError::StreamClosed)
    }

    /// Receive the next status with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> ProxyResult<Status> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => ProxyError::StreamTimeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
            RecvTimeoutError::Disconnected => ProxyError::StreamClosed,
        })
    }

    /// Take a buffered status if there is one.
    ///
    /// Returns `Ok(None)` when nothing is buffered and the stream is still open.
    pub fn try_recv(&self) -> ProxyResult<Option<Status>> {
        match self.rx.try_recv() {
            Ok(status) => Ok(Some(status)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(ProxyError::StreamClosed),
        }
    }

    /// Number of buffered statuses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Queue capacity.
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.rx.capacity()
    }

    /// Blocking iterator that ends when the stream closes.
    pub fn iter(&self) -> impl Iterator<Item = Status> + '_ {
        self.rx.iter()
    }
}
