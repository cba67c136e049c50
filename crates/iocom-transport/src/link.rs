//! Transport-agnostic duplex byte stream.
//!
//! A [`Link`] is whatever TCP, TLS, or serial hands the fabric driver: just
//! bytes in, bytes out. [`Acceptor`] and [`Connector`] are the two roles a
//! concrete transport plays — listening for inbound end-points, or dialing
//! one — so `iocom-fabric` can drive any of them through the same trait
//! objects.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::TransportError;

/// A duplex byte stream to a single peer.
pub trait Link: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Link for T {}

/// Something that listens for and accepts inbound connections.
#[async_trait]
pub trait Acceptor: Send + Sync {
    /// Blocks until the next peer connects, returning the link and a
    /// human-readable description of the peer (address or port path).
    async fn accept(&self) -> Result<(Box<dyn Link>, String), TransportError>;
}

/// Something that dials out to a single configured peer.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establishes the link to the configured peer.
    async fn connect(&self) -> Result<Box<dyn Link>, TransportError>;
}
