//! Memory block info exchange payload (system frame type 1).
//!
//! Grounded on `ioc_process_received_mbinfo_frame` in
//! `ioc_memory_block_info.c`: a presence-flags byte selects which optional
//! fields are present, followed by variable-width `device_nr`/`nbytes`,
//! a 1- or 2-byte `mblk_flags`, and optional length-prefixed name strings.

use super::{read_str, write_str};
use crate::errors::{ProtocolError, Result};
use crate::header::SystemFrameType;
use crate::ints;

bitflags::bitflags! {
    /// Presence/width flags for the mblk-info payload (byte 1, after the
    /// system-frame-type byte).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct InfoFlags: u8 {
        const DEVICE_NR_TWO_BYTES = 2;
        const DEVICE_NR_FOUR_BYTES = 4;
        const NBYTES_TWO_BYTES = 8;
        const NBYTES_FOUR_BYTES = 16;
        const MBLK_FLAGS_TWO_BYTES = 32;
        const HAS_DEVICE_NAME = 64;
        const HAS_MBLK_NAME = 128;
    }
}

/// Memory block info exchanged when a link comes up, one per visible block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MblkInfo {
    /// Sender's device number, or [`crate::AUTO_DEVICE_NR`] if unassigned.
    pub device_nr: u32,
    /// Memory block size in bytes.
    pub nbytes: u32,
    /// Direction/sync flags understood by the core crate (UP/DOWN/AUTO_SYNC/…).
    pub mblk_flags: u16,
    /// Device name, sent together with `network_name` or omitted together.
    pub device_name: Option<String>,
    /// Network name, present iff `device_name` is.
    pub network_name: Option<String>,
    /// Memory block name.
    pub mblk_name: Option<String>,
}

impl MblkInfo {
    /// Encodes this info as a full system-frame payload, including the
    /// leading system-frame-type byte.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![SystemFrameType::MblkInfo.to_byte()];
        let mut flags = InfoFlags::empty();

        let (dnr_width, dnr_w) = ints::width_for(self.device_nr);
        if dnr_w & ints::TWO_BYTES != 0 {
            flags |= InfoFlags::DEVICE_NR_TWO_BYTES;
        }
        if dnr_w & ints::FOUR_BYTES != 0 {
            flags |= InfoFlags::DEVICE_NR_FOUR_BYTES;
        }
        let (nb_width, nb_w) = ints::width_for(self.nbytes);
        if nb_w & ints::TWO_BYTES != 0 {
            flags |= InfoFlags::NBYTES_TWO_BYTES;
        }
        if nb_w & ints::FOUR_BYTES != 0 {
            flags |= InfoFlags::NBYTES_FOUR_BYTES;
        }
        let mblk_flags_wide = self.mblk_flags > 0xFF;
        if mblk_flags_wide {
            flags |= InfoFlags::MBLK_FLAGS_TWO_BYTES;
        }
        if self.device_name.is_some() {
            flags |= InfoFlags::HAS_DEVICE_NAME;
        }
        if self.mblk_name.is_some() {
            flags |= InfoFlags::HAS_MBLK_NAME;
        }

        out.push(flags.bits());

        let mut buf = [0u8; 4];
        ints::pack(self.device_nr, dnr_width, &mut buf);
        out.extend_from_slice(&buf[..dnr_width]);
        ints::pack(self.nbytes, nb_width, &mut buf);
        out.extend_from_slice(&buf[..nb_width]);

        out.push((self.mblk_flags & 0xFF) as u8);
        if mblk_flags_wide {
            out.push((self.mblk_flags >> 8) as u8);
        }

        if let Some(device_name) = &self.device_name {
            write_str(device_name, &mut out);
            write_str(self.network_name.as_deref().unwrap_or(""), &mut out);
        }
        if let Some(mblk_name) = &self.mblk_name {
            write_str(mblk_name, &mut out);
        }

        out
    }

    /// Decodes an mblk-info payload, including its leading system-frame-type
    /// byte (which is checked but not returned).
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedSystemFrame`] on truncation, or
    /// [`ProtocolError::UnknownSystemFrameType`] if byte 0 is not type 1.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.first().copied() != Some(SystemFrameType::MblkInfo.to_byte()) {
            return Err(ProtocolError::UnknownSystemFrameType(
                payload.first().copied().unwrap_or(0),
            ));
        }
        let flags_byte =
            *payload.get(1).ok_or(ProtocolError::MalformedSystemFrame("missing info flags"))?;
        let flags = InfoFlags::from_bits_truncate(flags_byte);
        let mut p = 2usize;

        let dnr_two = flags.contains(InfoFlags::DEVICE_NR_TWO_BYTES);
        let dnr_four = flags.contains(InfoFlags::DEVICE_NR_FOUR_BYTES);
        let width = if dnr_four { 4 } else if dnr_two { 2 } else { 1 };
        if payload.len() < p + width {
            return Err(ProtocolError::MalformedSystemFrame("device_nr runs past payload"));
        }
        let (device_nr, n) = ints::unpack(&payload[p..], dnr_two, dnr_four);
        p += n;

        let nb_two = flags.contains(InfoFlags::NBYTES_TWO_BYTES);
        let nb_four = flags.contains(InfoFlags::NBYTES_FOUR_BYTES);
        let width = if nb_four { 4 } else if nb_two { 2 } else { 1 };
        if payload.len() < p + width {
            return Err(ProtocolError::MalformedSystemFrame("nbytes runs past payload"));
        }
        let (nbytes, n) = ints::unpack(&payload[p..], nb_two, nb_four);
        p += n;

        let mblk_flags_wide = flags.contains(InfoFlags::MBLK_FLAGS_TWO_BYTES);
        let fw = if mblk_flags_wide { 2 } else { 1 };
        if payload.len() < p + fw {
            return Err(ProtocolError::MalformedSystemFrame("mblk_flags runs past payload"));
        }
        let mblk_flags = if mblk_flags_wide {
            u16::from(payload[p]) | (u16::from(payload[p + 1]) << 8)
        } else {
            u16::from(payload[p])
        };
        p += fw;

        let (device_name, network_name) = if flags.contains(InfoFlags::HAS_DEVICE_NAME) {
            let (dn, n) = read_str(&payload[p..])?;
            p += n;
            let (nn, n) = read_str(&payload[p..])?;
            p += n;
            (Some(dn), Some(nn))
        } else {
            (None, None)
        };

        let mblk_name = if flags.contains(InfoFlags::HAS_MBLK_NAME) {
            let (mn, n) = read_str(&payload[p..])?;
            p += n;
            Some(mn)
        } else {
            None
        };
        let _ = p;

        Ok(Self { device_nr, nbytes, mblk_flags, device_name, network_name, mblk_name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_with_names() {
        let info = MblkInfo {
            device_nr: 7,
            nbytes: 2048,
            mblk_flags: 0x03,
            device_name: Some("gina1".into()),
            network_name: Some("factory".into()),
            mblk_name: Some("exp".into()),
        };
        let encoded = info.encode();
        let decoded = MblkInfo::decode(&encoded).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn roundtrip_without_names_uses_minimal_encoding() {
        let info = MblkInfo {
            device_nr: 1,
            nbytes: 64,
            mblk_flags: 0x01,
            device_name: None,
            network_name: None,
            mblk_name: None,
        };
        let encoded = info.encode();
        assert_eq!(encoded.len(), 5); // type + flags + device_nr + nbytes + mblk_flags
        assert_eq!(MblkInfo::decode(&encoded).unwrap(), info);
    }

    #[test]
    fn large_values_pick_wide_encoding() {
        let info = MblkInfo {
            device_nr: 70_000,
            nbytes: 5_000_000,
            mblk_flags: 0x0102,
            device_name: None,
            network_name: None,
            mblk_name: None,
        };
        let encoded = info.encode();
        assert_eq!(MblkInfo::decode(&encoded).unwrap(), info);
    }

    #[test]
    fn truncated_payload_is_rejected() {
        assert!(MblkInfo::decode(&[1, 0]).is_err());
    }
}
