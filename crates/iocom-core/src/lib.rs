//! Sans-I/O replication engine: memory blocks, source/target buffers, the
//! serial handshake, authentication, mblk-info binding, and the per-link
//! connection state machine that ties them together.
//!
//! Every type here is pure state + the action pattern (methods take `now`
//! and return actions for a driver to execute); no socket, file, or thread
//! handle is held anywhere in this crate. The `iocom-transport` and
//! `iocom-fabric` crates elsewhere in this workspace provide the drivers.

pub mod auth;
pub mod connection;
pub mod env;
pub mod error;
pub mod flow;
pub mod mblk;
pub mod mblk_info;
pub mod sbuf;
pub mod serial_handshake;
pub mod tbuf;

pub use connection::{Connection, ConnectionAction, ConnectionConfig, ConnectionEvent, ConnectionState};
pub use env::Environment;
pub use error::ConnectionError;
pub use mblk::{ChangeKind, MemoryBlock, MblkFlags};
