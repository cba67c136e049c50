//! Wire-format error types.
//!
//! These cover malformed headers, truncated frames, and corrupt compressed
//! payloads — the "protocol violation" class from the error handling design
//! (closing the link is the caller's decision, not this crate's).

use thiserror::Error;

/// Result alias used throughout the codec.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while building or parsing wire-format frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer shorter than the fixed header portion it claims to contain.
    #[error("frame header too short: need at least {expected} bytes, got {actual}")]
    HeaderTooShort {
        /// Minimum bytes required to parse a header for this transport.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// Buffer shorter than `header + payload_size` once the header is known.
    #[error("frame truncated: payload claims {expected} bytes, {actual} available")]
    FrameTruncated {
        /// Payload bytes the header claims.
        expected: usize,
        /// Payload bytes actually available.
        actual: usize,
    },

    /// Payload size exceeds what fits in one frame for this transport.
    #[error("payload too large: {size} bytes exceeds frame capacity of {max}")]
    PayloadTooLarge {
        /// Size that was requested.
        size: usize,
        /// Maximum payload size for the transport in question.
        max: usize,
    },

    /// CRC-16 mismatch on a serial frame.
    #[error("crc mismatch: expected {expected:#06x}, computed {computed:#06x}")]
    CrcMismatch {
        /// CRC transmitted in the frame.
        expected: u16,
        /// CRC computed over the received bytes.
        computed: u16,
    },

    /// Frame number outside 0..=200, or an unexpected repeat of 0.
    #[error("invalid frame number: {0}")]
    InvalidFrameNumber(u8),

    /// RLE/delta decompression ran past the end of the source or destination
    /// buffer, indicating a corrupted or malicious payload.
    #[error("corrupt compressed payload: {0}")]
    CorruptCompression(&'static str),

    /// System-frame payload (mblk-info / auth / remove-mblk) failed to
    /// tag-parse.
    #[error("malformed system frame payload: {0}")]
    MalformedSystemFrame(&'static str),

    /// Unrecognized system-frame sub-type byte.
    #[error("unknown system frame type: {0}")]
    UnknownSystemFrameType(u8),
}
