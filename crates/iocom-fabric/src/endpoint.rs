//! End-point: the acceptor loop that turns inbound links into driver tasks.
//!
//! Accept, spawn, loop: generic over any [`Acceptor`] so the same code
//! drives TCP or TLS; serial has no listening role and instead calls
//! [`crate::driver::run`] directly against a connector-dialed link.

use std::sync::Arc;

use iocom_core::connection::ConnectionConfig;
use iocom_core::Environment;
use iocom_proto::header::Transport;
use iocom_transport::Acceptor;

use crate::driver;
use crate::error::FabricError;
use crate::root::Root;

/// Template applied to every connection this end-point accepts.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Wire transport this end-point listens on.
    pub transport: Transport,
    /// Per-connection protocol configuration (device identity, timings).
    pub connection: ConnectionConfig,
    /// Network this end-point authenticates incoming devices against.
    pub network_name: String,
    /// Device name this end-point presents as.
    pub device_name: String,
    /// Whether an unrecognised advertised memory block is created on demand.
    pub allow_dynamic_mblk: bool,
}

/// Accepts connections from `acceptor` forever, spawning one driver task per
/// peer. Runs until the acceptor itself errors (e.g. the listener is
/// dropped), at which point the error is returned.
pub async fn run<E: Environment>(
    root: Arc<Root>,
    acceptor: Arc<dyn Acceptor>,
    config: EndpointConfig,
    env: E,
) -> Result<(), FabricError> {
    loop {
        let (link, peer) = acceptor.accept().await?;
        tracing::info!(peer = %peer, "accepted connection");

        let root = Arc::clone(&root);
        let config = config.clone();
        let env = env.clone();
        tokio::spawn(async move {
            let result = driver::run(
                &root,
                link,
                peer.clone(),
                config.transport,
                config.connection,
                &env,
                config.network_name,
                config.device_name,
                config.allow_dynamic_mblk,
            )
            .await;
            if let Err(e) = result {
                tracing::warn!(peer = %peer, error = %e, "connection driver exited with error");
            }
        });
    }
}
