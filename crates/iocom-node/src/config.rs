//! TOML config schema for a node: device identity, statically configured
//! memory blocks, and the end-points to run.
//!
//! Read from a TOML file rather than CLI flags, since one node can run
//! several end-points and memory blocks rather than a single bind address.
//! A thin reader, not a console: it has no notion of editing a running
//! node's configuration.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use iocom_core::connection::ConnectionConfig;
use iocom_core::mblk::LinkTimings;
use iocom_core::mblk_info::MblkKey;
use iocom_core::{MblkFlags, MemoryBlock};
use iocom_proto::header::Transport;

use crate::error::NodeError;

/// Top-level config file schema.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// This node's identity.
    pub device: DeviceConfig,
    /// Statically configured memory blocks this node owns.
    #[serde(default)]
    pub mblk: Vec<MblkConfig>,
    /// End-points this node runs.
    #[serde(default)]
    pub endpoint: Vec<EndpointConfig>,
}

/// This node's identity and default authentication credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Device name presented on every link.
    pub name: String,
    /// Device number, or omit to request automatic assignment.
    #[serde(default = "default_device_nr")]
    pub device_nr: u32,
    /// Network this device authenticates against.
    pub network: String,
    /// Shared-secret password presented on every link.
    pub password: String,
    /// Password to present instead of `password` on a TLS end-point, for
    /// deployments that use a stronger secret over an encrypted link. Falls
    /// back to `password` if unset.
    #[serde(default)]
    pub password_tls: Option<String>,
    /// Whether an unrecognised advertised block is created on demand.
    #[serde(default = "default_true")]
    pub allow_dynamic_mblk: bool,
}

fn default_device_nr() -> u32 {
    iocom_proto::AUTO_DEVICE_NR
}

fn default_true() -> bool {
    true
}

/// One statically configured memory block.
#[derive(Debug, Clone, Deserialize)]
pub struct MblkConfig {
    /// Block name.
    pub name: String,
    /// Size in bytes.
    pub nbytes: usize,
    /// Data flows from this node up toward its peer.
    #[serde(default)]
    pub up: bool,
    /// Data flows from the peer down to this node.
    #[serde(default)]
    pub down: bool,
    /// Both directions are replicated on this block.
    #[serde(default)]
    pub bidirectional: bool,
    /// Commit publishes a change automatically.
    #[serde(default)]
    pub auto_sync: bool,
}

impl MblkConfig {
    fn flags(&self) -> MblkFlags {
        let mut flags = MblkFlags::STATIC;
        if self.up {
            flags |= MblkFlags::UP;
        }
        if self.down {
            flags |= MblkFlags::DOWN;
        }
        if self.bidirectional {
            flags |= MblkFlags::BIDIRECTIONAL;
        }
        if self.auto_sync {
            flags |= MblkFlags::AUTO_SYNC;
        }
        flags
    }
}

/// One end-point (listening or dialed-out) this node runs.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EndpointConfig {
    /// Plain TCP listener.
    Tcp {
        /// Address to bind, e.g. `"0.0.0.0:6368"`.
        bind: String,
    },
    /// TLS listener over TCP.
    Tls {
        /// Address to bind.
        bind: String,
        /// PEM certificate path; a self-signed certificate is generated if
        /// omitted.
        cert: Option<String>,
        /// PEM private key path; required if `cert` is set.
        key: Option<String>,
    },
    /// Raw serial connection, dialed out (there is no serial listener).
    Serial {
        /// Device path, e.g. `"/dev/ttyUSB0"`.
        path: String,
        /// Baud rate.
        baud_rate: u32,
    },
}

impl NodeConfig {
    /// Loads and parses a config file from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::ConfigRead`] if the file cannot be read, or
    /// [`NodeError::ConfigParse`] if it is not valid TOML matching this
    /// schema.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|source| NodeError::ConfigRead { path: path.display().to_string(), source })?;
        toml::from_str(&text)
            .map_err(|source| NodeError::ConfigParse { path: path.display().to_string(), source })
    }

    /// Builds the connection template shared by every end-point this node
    /// runs, for the given wire transport. `is_tls` selects `password_tls`
    /// over `password` when sending the auth frame.
    #[must_use]
    pub fn connection_config(&self, transport: Transport, is_tls: bool) -> ConnectionConfig {
        let timings = if transport == Transport::Serial { LinkTimings::SERIAL } else { LinkTimings::TCP };
        ConnectionConfig {
            transport,
            timings,
            device_name: self.device.name.clone(),
            device_nr: self.device.device_nr,
            network_name: self.device.network.clone(),
            password: self.device.password.clone(),
            password_tls: self.device.password_tls.clone(),
            is_tls,
            connect_up: false,
            bidirectional: self.mblk.iter().any(|m| m.bidirectional),
        }
    }

    /// Builds every statically configured memory block, keyed for
    /// insertion into a [`iocom_core::mblk_info::MblkRegistry`].
    #[must_use]
    pub fn memory_blocks(&self) -> Vec<(MblkKey, MemoryBlock)> {
        self.mblk
            .iter()
            .map(|m| {
                let key = MblkKey {
                    network_name: self.device.network.clone(),
                    device_name: self.device.name.clone(),
                    device_nr: self.device.device_nr,
                    mblk_name: m.name.clone(),
                };
                let block = MemoryBlock::new(
                    m.name.clone(),
                    self.device.network.clone(),
                    self.device.name.clone(),
                    self.device.device_nr,
                    m.nbytes,
                    m.flags(),
                );
                (key, block)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_config() {
        let toml = r#"
            [device]
            name = "plc1"
            network = "factory"
            password = "secret"

            [[mblk]]
            name = "inputs"
            nbytes = 64
            up = true

            [[endpoint]]
            kind = "tcp"
            bind = "0.0.0.0:6368"
        "#;
        let config: NodeConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.device.name, "plc1");
        assert_eq!(config.mblk.len(), 1);
        assert!(matches!(&config.endpoint[0], EndpointConfig::Tcp { bind } if bind == "0.0.0.0:6368"));
    }

    #[test]
    fn missing_file_reports_config_read_error() {
        let err = NodeConfig::load("/nonexistent/path/iocom-node.toml").unwrap_err();
        assert!(matches!(err, NodeError::ConfigRead { .. }));
    }

    #[test]
    fn loads_from_a_real_file_on_disk() {
        let toml = r#"
            [device]
            name = "plc1"
            network = "factory"
            password = "secret"
            password_tls = "stronger-secret"

            [[endpoint]]
            kind = "tls"
            bind = "0.0.0.0:6368"
        "#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        file.write_all(toml.as_bytes()).unwrap();

        let config = NodeConfig::load(file.path()).unwrap();
        assert_eq!(config.device.password_tls.as_deref(), Some("stronger-secret"));

        let connection = config.connection_config(Transport::Socket, true);
        assert_eq!(connection.password_tls.as_deref(), Some("stronger-secret"));
        assert!(connection.is_tls);
    }

    #[test]
    fn memory_blocks_carry_static_and_direction_flags() {
        let toml = r#"
            [device]
            name = "plc1"
            network = "factory"
            password = "secret"

            [[mblk]]
            name = "inputs"
            nbytes = 64
            up = true
        "#;
        let config: NodeConfig = toml::from_str(toml).unwrap();
        let blocks = config.memory_blocks();
        assert_eq!(blocks.len(), 1);
        let (_, block) = &blocks[0];
        assert!(block.flags().contains(MblkFlags::UP));
        assert!(block.flags().contains(MblkFlags::STATIC));
        assert!(!block.flags().contains(MblkFlags::DOWN));
    }
}
