//! Error types for the replication engine.
//!
//! Connection errors map to the error classes used throughout: transient
//! link faults are recoverable (caller retries), protocol violations and
//! authorisation denials close the link.

use std::time::Duration;

use thiserror::Error;

use crate::connection::ConnectionState;

/// Errors produced by the connection state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Invalid state transition attempted.
    #[error("invalid state transition: cannot {operation} from {state:?}")]
    InvalidState {
        /// State the connection was in when the operation was attempted.
        state: ConnectionState,
        /// Operation that was attempted.
        operation: &'static str,
    },

    /// Auth frame processing failed before the link is usable.
    #[error("authentication rejected: {0}")]
    AuthenticationRejected(String),

    /// A data frame arrived for a network not on the allowed list.
    #[error("unauthorised network: {0}")]
    UnauthorisedNetwork(String),

    /// Silence timeout exceeded; link considered broken.
    #[error("silence timeout after {elapsed:?}")]
    SilenceTimeout {
        /// How long nothing was received before the link was declared dead.
        elapsed: Duration,
    },

    /// Wire-format violation (bad CRC, frame_nr, oversize frame, malformed
    /// system frame).
    #[error("protocol violation: {0}")]
    Protocol(#[from] iocom_proto::ProtocolError),

    /// Underlying transport I/O failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl ConnectionError {
    /// True if this error is transient (wait, retry) rather than fatal to
    /// the link (close, backoff).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
