//! Async I/O for the IOCOM fabric: TCP, TLS, and serial implementations of
//! the transport-agnostic [`Link`] plus frame-at-a-time read/write helpers.
//!
//! Everything in `iocom-core` is sans-I/O; this crate is where bytes
//! actually move. `iocom-fabric`'s driver owns one [`framed::FrameReader`]
//! per connection and turns `iocom_core::ConnectionAction`s into writes.

pub mod error;
pub mod framed;
pub mod link;
pub mod serial;
pub mod tcp;
pub mod tls;

pub use error::TransportError;
pub use framed::{FrameReader, ReceivedFrame};
pub use link::{Acceptor, Connector, Link};
