//! Node-level error type: config loading plus whatever a running end-point
//! or serial connector surfaces.

use thiserror::Error;

/// Errors that can abort `iocom-node` at start-up or while running.
#[derive(Error, Debug)]
pub enum NodeError {
    /// The config file could not be read from disk.
    #[error("failed to read config file '{path}': {source}")]
    ConfigRead {
        /// Path that was read.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The config file was not valid TOML, or failed its schema.
    #[error("invalid config file '{path}': {source}")]
    ConfigParse {
        /// Path that was parsed.
        path: String,
        /// Underlying parse failure.
        #[source]
        source: toml::de::Error,
    },

    /// An end-point's transport could not be bound or connected.
    #[error(transparent)]
    Transport(#[from] iocom_transport::TransportError),

    /// A connection driver exited with an unrecoverable error.
    #[error(transparent)]
    Fabric(#[from] iocom_fabric::FabricError),

    /// An end-point task panicked or was cancelled.
    #[error("end-point task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
