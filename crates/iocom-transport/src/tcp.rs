//! Plain TCP transport.
//!
//! A listener bound once at start-up, handing out one `TcpStream` per
//! accepted peer.

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};

use crate::error::TransportError;
use crate::link::{Acceptor, Connector, Link};

/// Listens for inbound TCP connections.
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    /// Binds to `address` (e.g. `"0.0.0.0:6368"`).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the address cannot be bound.
    pub async fn bind(address: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(address).await?;
        tracing::info!(address, "TCP transport bound");
        Ok(Self { listener })
    }

    /// The address actually bound (useful when `address` used port 0).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the local address cannot be read.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }
}

#[async_trait]
impl Acceptor for TcpAcceptor {
    async fn accept(&self) -> Result<(Box<dyn Link>, String), TransportError> {
        let (stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((Box::new(stream), addr.to_string()))
    }
}

/// Dials a single configured TCP peer.
pub struct TcpConnector {
    address: String,
}

impl TcpConnector {
    /// Creates a connector for `address` (e.g. `"10.0.0.2:6368"`).
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self { address: address.into() }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Box<dyn Link>, TransportError> {
        let stream = TcpStream::connect(&self.address).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn connect_round_trips_bytes() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0").await.unwrap();
        let addr = acceptor.local_addr().unwrap();
        let connector = TcpConnector::new(addr.to_string());

        let accept_task = tokio::spawn(async move { acceptor.accept().await.unwrap() });
        let mut client = connector.connect().await.unwrap();
        let (mut server, peer) = accept_task.await.unwrap();
        assert!(!peer.is_empty());

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn bind_rejects_invalid_address() {
        assert!(TcpAcceptor::bind("not-an-address").await.is_err());
    }
}
