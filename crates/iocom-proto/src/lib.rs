//! Wire format for the IOCOM replication fabric: frame headers, CRC-16,
//! run-length/delta compression, and system-frame payloads.
//!
//! This crate is sans-I/O: it only builds and parses byte buffers. Driving
//! the protocol over an actual transport is `iocom-core`'s and
//! `iocom-transport`'s job.

pub mod compress;
pub mod crc;
pub mod errors;
pub mod header;
pub mod ints;
pub mod payload;

pub use errors::{ProtocolError, Result};
pub use header::{
    build_ack, build_frame, fixed_header_sz, parse_ack, parse_header, ExtraFlags, FrameFlags,
    Header, SystemFrameType, Transport, ACK_SENTINEL, MAX_FRAME_NR, SERIAL_ACK_SZ,
    SERIAL_FRAME_SZ, SOCKET_ACK_SZ, SOCKET_FRAME_SZ,
};

/// Sentinel device number meaning "assign me one dynamically".
///
/// Locally assigned numbers start at `AUTO_DEVICE_NR + 1`, per the
/// reserved dynamic range.
pub const AUTO_DEVICE_NR: u32 = 10_000;
