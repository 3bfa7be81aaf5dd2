//! Remote-call error classification.

use crate::error::CallError;

/// What a failed remote call means for the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// Temporary unreachability: mark disconnected so the health loop
    /// reconnects.
    Transient,
    /// The plugin does not implement the operation. Logged only.
    Unsupported,
    /// Any other failure. Logged as a warning.
    Other,
}

impl Classification {
    /// Whether the error counts toward the forced-reconnection threshold.
    #[must_use]
    pub const fn counts_as_error(self) -> bool {
        !matches!(self, Self::Unsupported)
    }

    /// Whether the connection should be marked down.
    #[must_use]
    pub const fn marks_disconnected(self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// Maps a gRPC status code to an action.
#[must_use]
pub const fn classify_code(code: tonic::Code) -> Classification {
    match code {
        tonic::Code::Unavailable | tonic::Code::DeadlineExceeded => Classification::Transient,
        tonic::Code::Unimplemented => Classification::Unsupported,
        _ => Classification::Other,
    }
}

/// Classifies a failed call.
#[must_use]
pub const fn classify(err: &CallError) -> Classification {
    classify_code(err.code)
}
