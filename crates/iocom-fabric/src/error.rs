//! Fabric-level error types.

use thiserror::Error;

/// Errors produced by the root registry and connection drivers.
#[derive(Error, Debug)]
pub enum FabricError {
    /// A connection-level protocol error.
    #[error("connection error: {0}")]
    Connection(#[from] iocom_core::ConnectionError),

    /// A transport-level I/O error.
    #[error("transport error: {0}")]
    Transport(#[from] iocom_transport::TransportError),

    /// A wire-format error.
    #[error("protocol error: {0}")]
    Protocol(#[from] iocom_proto::ProtocolError),

    /// The peer was not authenticated for the requested network.
    #[error("unauthorised network: {0}")]
    UnauthorisedNetwork(String),
}
