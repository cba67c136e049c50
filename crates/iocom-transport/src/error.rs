//! Transport-layer error types.
//!
//! Typed variants for protocol violations, plus a boundary conversion from
//! `std::io::Error` for the actual socket/port failures this crate deals in.

use thiserror::Error;

/// Errors produced while driving a transport (TCP, TLS, serial).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Underlying socket, TLS, or serial port I/O failed.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A received frame failed to parse.
    #[error("protocol error: {0}")]
    Protocol(#[from] iocom_proto::ProtocolError),

    /// TLS handshake or certificate setup failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Serial port configuration was rejected.
    #[error("serial port error: {0}")]
    Serial(String),

    /// The peer closed the connection before a full frame arrived.
    #[error("peer closed the connection")]
    Closed,

    /// Bind or connect address could not be parsed.
    #[error("invalid address '{0}'")]
    InvalidAddress(String),
}
