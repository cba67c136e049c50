//! System-frame payload codecs (mblk-info exchange, authentication,
//! remove-mblk request).
//!
//! These are tag-packed, not CBOR: a leading presence-flags byte picks which
//! optional fields follow, each field using the same variable-width integer
//! packing and length-prefixed strings as the rest of the wire format.
//! Mirrors `ioc_memory_block_info.c` / `ioc_authentication.c`.

pub mod auth;
pub mod mblk_info;
pub mod remove_mblk;

use crate::errors::{ProtocolError, Result};

/// Maximum length of a packed string field (device/network/mblk names),
/// matching the single-byte length prefix.
pub const MAX_STR_LEN: usize = 255;

/// Writes a length-prefixed string into `dst`, returning bytes written.
pub(crate) fn write_str(s: &str, dst: &mut Vec<u8>) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(MAX_STR_LEN);
    dst.push(len as u8);
    dst.extend_from_slice(&bytes[..len]);
}

/// Reads a length-prefixed string from the front of `src`, returning
/// `(string, bytes_consumed)`.
pub(crate) fn read_str(src: &[u8]) -> Result<(String, usize)> {
    let len = *src.first().ok_or(ProtocolError::MalformedSystemFrame("missing string length"))?;
    let len = usize::from(len);
    let total = 1 + len;
    if src.len() < total {
        return Err(ProtocolError::MalformedSystemFrame("string runs past end of payload"));
    }
    let s = String::from_utf8_lossy(&src[1..total]).into_owned();
    Ok((s, total))
}
