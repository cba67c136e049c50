//! Deterministic simulation harness: a turmoil-backed [`Environment`] and
//! [`Link`] implementation so `iocom-fabric`'s real driver code can be
//! exercised against a reproducible, controllable network instead of real
//! sockets and wall-clock time.
//!
//! [`Environment`]: iocom_core::env::Environment
//! [`Link`]: iocom_transport::Link

pub mod sim_env;
pub mod sim_transport;

pub use sim_env::SimEnv;
pub use sim_transport::{SimAcceptor, SimConnector};
