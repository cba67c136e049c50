//! Raw serial transport.
//!
//! A serial link is point-to-point: there is no listening role, just
//! opening the configured port. Framed as a [`Connector`] for the same
//! reason `TcpConnector`/`TlsConnector` are — so `iocom-fabric` drives every
//! transport kind through one trait object.

use async_trait::async_trait;
use tokio_serial::SerialPortBuilderExt;

use crate::error::TransportError;
use crate::link::{Connector, Link};

/// Opens a configured serial port.
pub struct SerialConnector {
    path: String,
    baud_rate: u32,
}

impl SerialConnector {
    /// Creates a connector for the device at `path` (e.g. `/dev/ttyUSB0`)
    /// running at `baud_rate`.
    #[must_use]
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self { path: path.into(), baud_rate }
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn connect(&self) -> Result<Box<dyn Link>, TransportError> {
        let port = tokio_serial::new(&self.path, self.baud_rate)
            .open_native_async()
            .map_err(|e| TransportError::Serial(format!("failed to open '{}': {e}", self.path)))?;
        Ok(Box::new(port))
    }
}
