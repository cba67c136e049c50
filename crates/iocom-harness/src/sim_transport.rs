//! Turmoil-backed `Link`/`Acceptor`/`Connector`.
//!
//! Grounded on `iocom_transport::tcp`'s `TcpAcceptor`/`TcpConnector`: the
//! same shape, wired to turmoil's simulated network instead of the real
//! kernel socket stack, so `iocom-fabric`'s `endpoint::run`/`driver::run`
//! drive a simulated link exactly as they drive a real one.

use async_trait::async_trait;
use iocom_transport::{Acceptor, Connector, Link, TransportError};
use turmoil::net::{TcpListener, TcpStream};

/// Listens for inbound connections on one turmoil host.
pub struct SimAcceptor {
    listener: TcpListener,
}

impl SimAcceptor {
    /// Binds a simulated listener at `address` (host:port within the
    /// simulation).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the address cannot be bound.
    pub async fn bind(address: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self { listener })
    }
}

#[async_trait]
impl Acceptor for SimAcceptor {
    async fn accept(&self) -> Result<(Box<dyn Link>, String), TransportError> {
        let (stream, addr) = self.listener.accept().await?;
        Ok((Box::new(stream), addr.to_string()))
    }
}

/// Dials a single configured peer from within a turmoil simulation.
pub struct SimConnector {
    address: String,
}

impl SimConnector {
    /// Creates a connector targeting `address` (turmoil host:port).
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self { address: address.into() }
    }
}

#[async_trait]
impl Connector for SimConnector {
    async fn connect(&self) -> Result<Box<dyn Link>, TransportError> {
        let stream = TcpStream::connect(&self.address).await?;
        Ok(Box::new(stream))
    }
}
