//! Remove-mblk-request payload (system frame type 3).
//!
//! Sent when a dynamically created memory block on one side goes away and
//! the peer should drop its matching SBUF/TBUF pair. Identifies the block
//! the same way the mblk-info exchange does: device_nr plus
//! device/network/mblk name, so the receiver can look it up the same way it
//! was bound in the first place.

use super::{read_str, write_str};
use crate::errors::{ProtocolError, Result};
use crate::header::SystemFrameType;
use crate::ints;

/// Request to remove a previously bound, dynamically created memory block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveMblkRequest {
    /// Device number owning the block being removed.
    pub device_nr: u32,
    /// Device name owning the block.
    pub device_name: String,
    /// Network name.
    pub network_name: String,
    /// Memory block name.
    pub mblk_name: String,
}

impl RemoveMblkRequest {
    /// Encodes this request as a full system-frame payload, including the
    /// leading system-frame-type byte.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![SystemFrameType::RemoveMblkRequest.to_byte()];
        let (width, _) = ints::width_for(self.device_nr);
        let mut buf = [0u8; 4];
        out.push(width as u8);
        ints::pack(self.device_nr, width, &mut buf);
        out.extend_from_slice(&buf[..width]);
        write_str(&self.device_name, &mut out);
        write_str(&self.network_name, &mut out);
        write_str(&self.mblk_name, &mut out);
        out
    }

    /// Decodes a remove-mblk-request payload, including its leading
    /// system-frame-type byte.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedSystemFrame`] on truncation, or
    /// [`ProtocolError::UnknownSystemFrameType`] if byte 0 is not type 3.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.first().copied() != Some(SystemFrameType::RemoveMblkRequest.to_byte()) {
            return Err(ProtocolError::UnknownSystemFrameType(
                payload.first().copied().unwrap_or(0),
            ));
        }
        let width = usize::from(
            *payload.get(1).ok_or(ProtocolError::MalformedSystemFrame("missing device_nr width"))?,
        );
        if !(1..=4).contains(&width) || payload.len() < 2 + width {
            return Err(ProtocolError::MalformedSystemFrame("device_nr width out of range"));
        }
        let (device_nr, _) = ints::unpack(&payload[2..], width >= 2, width == 4);
        let mut p = 2 + width;

        let (device_name, n) = read_str(&payload[p..])?;
        p += n;
        let (network_name, n) = read_str(&payload[p..])?;
        p += n;
        let (mblk_name, n) = read_str(&payload[p..])?;
        p += n;
        let _ = p;

        Ok(Self { device_nr, device_name, network_name, mblk_name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let req = RemoveMblkRequest {
            device_nr: 42,
            device_name: "gina1".into(),
            network_name: "factory".into(),
            mblk_name: "exp".into(),
        };
        let encoded = req.encode();
        assert_eq!(RemoveMblkRequest::decode(&encoded).unwrap(), req);
    }

    #[test]
    fn wide_device_nr_roundtrips() {
        let req = RemoveMblkRequest {
            device_nr: 1_000_000,
            device_name: "d".into(),
            network_name: "n".into(),
            mblk_name: "m".into(),
        };
        let encoded = req.encode();
        assert_eq!(RemoveMblkRequest::decode(&encoded).unwrap(), req);
    }
}
