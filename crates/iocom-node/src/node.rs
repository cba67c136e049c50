//! Orchestration: turns a loaded [`NodeConfig`] into a running [`Root`] plus
//! one task per configured end-point.
//!
//! Builds the shared state once, then hands it to however many listeners
//! are configured, split across transports the way
//! `iocom-fabric::endpoint::run` already generalises accept loops, plus a
//! direct one-shot [`driver::run`] call for the serial case, which has no
//! listening role.

use std::sync::Arc;

use iocom_core::auth::Authenticator;
use iocom_proto::header::Transport;
use iocom_transport::serial::SerialConnector;
use iocom_transport::tcp::TcpAcceptor;
use iocom_transport::tls::TlsAcceptor;
use iocom_transport::{Acceptor, Connector};

use crate::auth::PasswordAuthenticator;
use crate::config::{EndpointConfig, NodeConfig};
use crate::error::NodeError;
use crate::system_env::SystemEnv;
use iocom_fabric::endpoint::{self, EndpointConfig as FabricEndpointConfig};
use iocom_fabric::{driver, Root};

/// Builds the shared root and runs every configured end-point until one of
/// them fails. End-points run concurrently; the first to return an error
/// stops the whole node.
///
/// # Errors
///
/// Returns [`NodeError::Transport`] if an end-point's listener cannot be
/// bound, or [`NodeError::Fabric`] if a driver task exits with an
/// unrecoverable error.
pub async fn run(config: NodeConfig) -> Result<(), NodeError> {
    let authenticator: Arc<dyn Authenticator> = Arc::new(PasswordAuthenticator::new(
        config.device.network.clone(),
        config.device.password.clone(),
        config.device.password_tls.clone(),
    ));
    let root = Arc::new(Root::new(authenticator));

    root.with_registry(|registry| {
        for (key, block) in config.memory_blocks() {
            registry.insert(key, block);
        }
    });

    let env = SystemEnv::new();
    let mut tasks = Vec::new();

    for endpoint_config in &config.endpoint {
        let task = spawn_endpoint(&root, &config, endpoint_config.clone(), env.clone()).await?;
        tasks.push(task);
    }

    for task in tasks {
        task.await??;
    }

    Ok(())
}

async fn spawn_endpoint(
    root: &Arc<Root>,
    config: &NodeConfig,
    endpoint_config: EndpointConfig,
    env: SystemEnv,
) -> Result<tokio::task::JoinHandle<Result<(), NodeError>>, NodeError> {
    let root = Arc::clone(root);
    let device = config.device.clone();
    let allow_dynamic_mblk = device.allow_dynamic_mblk;

    let handle = match endpoint_config {
        EndpointConfig::Tcp { bind } => {
            let acceptor: Arc<dyn Acceptor> = Arc::new(TcpAcceptor::bind(&bind).await?);
            let fabric_config = FabricEndpointConfig {
                transport: Transport::Socket,
                connection: config.connection_config(Transport::Socket, false),
                network_name: device.network.clone(),
                device_name: device.name.clone(),
                allow_dynamic_mblk,
            };
            tracing::info!(bind = %bind, "TCP end-point listening");
            tokio::spawn(async move {
                endpoint::run(root, acceptor, fabric_config, env).await.map_err(NodeError::from)
            })
        }
        EndpointConfig::Tls { bind, cert, key } => {
            let acceptor: Arc<dyn Acceptor> =
                Arc::new(TlsAcceptor::bind(&bind, cert.as_deref(), key.as_deref()).await?);
            let fabric_config = FabricEndpointConfig {
                transport: Transport::Socket,
                connection: config.connection_config(Transport::Socket, true),
                network_name: device.network.clone(),
                device_name: device.name.clone(),
                allow_dynamic_mblk,
            };
            tracing::info!(bind = %bind, "TLS end-point listening");
            tokio::spawn(async move {
                endpoint::run(root, acceptor, fabric_config, env).await.map_err(NodeError::from)
            })
        }
        EndpointConfig::Serial { path, baud_rate } => {
            let connector = SerialConnector::new(path.clone(), baud_rate);
            let connection_config = config.connection_config(Transport::Serial, false);
            let network_name = device.network.clone();
            let device_name = device.name.clone();
            tracing::info!(path = %path, baud_rate, "opening serial end-point");
            tokio::spawn(async move {
                let link = connector.connect().await?;
                driver::run(
                    &root,
                    link,
                    path,
                    Transport::Serial,
                    connection_config,
                    &env,
                    network_name,
                    device_name,
                    allow_dynamic_mblk,
                )
                .await
                .map_err(NodeError::from)
            })
        }
    };

    Ok(handle)
}
