//! Authentication payload (system frame type 2).
//!
//! Grounded on `ioc_make_authentication_frame` / `ioc_process_received_authentication_frame`
//! in `ioc_authentication.c`: device_name, a compactly packed device_nr,
//! network_name, and password, preceded by a flags byte that carries
//! connect-direction, bidirectional, administrator, and device_nr width bits.

use super::{read_str, write_str};
use crate::errors::{ProtocolError, Result};
use crate::header::SystemFrameType;
use crate::ints;

bitflags::bitflags! {
    /// Flags carried in the auth payload's flags byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AuthFlags: u8 {
        /// Sender identifies as an administrator account.
        const ADMINISTRATOR = 1;
        /// Sender considers this link "connect up" (toward the controller).
        const CONNECT_UP = 16;
        /// `device_nr` is packed in 2 bytes.
        const DEVICE_NR_TWO_BYTES = 32;
        /// `device_nr` is packed in 4 bytes.
        const DEVICE_NR_FOUR_BYTES = 64;
        /// Sender wants bidirectional communication on shared memory blocks.
        const BIDIRECTIONAL_COM = 128;
    }
}

/// Authentication data sent exactly once by each side at connect time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFrame {
    /// Device name identifying this end.
    pub device_name: String,
    /// Device number, or 0 to request automatic assignment.
    pub device_nr: u32,
    /// Network name.
    pub network_name: String,
    /// Password for this transport (TLS and clear-text passwords may differ).
    pub password: String,
    /// This side considers the link "connect up".
    pub connect_up: bool,
    /// This side wants bidirectional communication.
    pub bidirectional: bool,
    /// This side identifies as an administrator account.
    pub administrator: bool,
}

impl AuthFrame {
    /// Encodes this frame as a full system-frame payload, including the
    /// leading system-frame-type byte.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![SystemFrameType::Auth.to_byte(), 0u8];
        let mut flags = AuthFlags::empty();
        if self.connect_up {
            flags |= AuthFlags::CONNECT_UP;
        }
        if self.bidirectional {
            flags |= AuthFlags::BIDIRECTIONAL_COM;
        }
        if self.administrator {
            flags |= AuthFlags::ADMINISTRATOR;
        }

        write_str(&self.device_name, &mut out);

        let (width, w) = ints::width_for(self.device_nr);
        if w & ints::TWO_BYTES != 0 {
            flags |= AuthFlags::DEVICE_NR_TWO_BYTES;
        }
        if w & ints::FOUR_BYTES != 0 {
            flags |= AuthFlags::DEVICE_NR_FOUR_BYTES;
        }
        let mut buf = [0u8; 4];
        ints::pack(self.device_nr, width, &mut buf);
        out.extend_from_slice(&buf[..width]);

        write_str(&self.network_name, &mut out);
        write_str(&self.password, &mut out);

        out[1] = flags.bits();
        out
    }

    /// Decodes an auth payload, including its leading system-frame-type byte.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedSystemFrame`] on truncation, or
    /// [`ProtocolError::UnknownSystemFrameType`] if byte 0 is not type 2.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.first().copied() != Some(SystemFrameType::Auth.to_byte()) {
            return Err(ProtocolError::UnknownSystemFrameType(
                payload.first().copied().unwrap_or(0),
            ));
        }
        let flags_byte =
            *payload.get(1).ok_or(ProtocolError::MalformedSystemFrame("missing auth flags"))?;
        let flags = AuthFlags::from_bits_truncate(flags_byte);
        let mut p = 2usize;

        let (device_name, n) = read_str(&payload[p..])?;
        p += n;

        let two = flags.contains(AuthFlags::DEVICE_NR_TWO_BYTES);
        let four = flags.contains(AuthFlags::DEVICE_NR_FOUR_BYTES);
        let width = if four { 4 } else if two { 2 } else { 1 };
        if payload.len() < p + width {
            return Err(ProtocolError::MalformedSystemFrame("device_nr runs past payload"));
        }
        let (device_nr, n) = ints::unpack(&payload[p..], two, four);
        p += n;

        let (network_name, n) = read_str(&payload[p..])?;
        p += n;
        let (password, n) = read_str(&payload[p..])?;
        p += n;
        let _ = p;

        Ok(Self {
            device_name,
            device_nr,
            network_name,
            password,
            connect_up: flags.contains(AuthFlags::CONNECT_UP),
            bidirectional: flags.contains(AuthFlags::BIDIRECTIONAL_COM),
            administrator: flags.contains(AuthFlags::ADMINISTRATOR),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_basic() {
        let frame = AuthFrame {
            device_name: "gina1".into(),
            device_nr: 3,
            network_name: "factory".into(),
            password: "secret".into(),
            connect_up: true,
            bidirectional: false,
            administrator: false,
        };
        let encoded = frame.encode();
        assert_eq!(AuthFrame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn roundtrip_auto_device_nr_and_bidirectional() {
        let frame = AuthFrame {
            device_name: "sensor".into(),
            device_nr: 0,
            network_name: "net".into(),
            password: String::new(),
            connect_up: false,
            bidirectional: true,
            administrator: true,
        };
        let encoded = frame.encode();
        assert_eq!(AuthFrame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn wide_device_nr_roundtrips() {
        let frame = AuthFrame {
            device_name: "d".into(),
            device_nr: 500_000,
            network_name: "n".into(),
            password: "p".into(),
            connect_up: false,
            bidirectional: false,
            administrator: false,
        };
        let encoded = frame.encode();
        assert_eq!(AuthFrame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn wrong_system_frame_type_rejected() {
        let mut bad = AuthFrame {
            device_name: "d".into(),
            device_nr: 1,
            network_name: "n".into(),
            password: "p".into(),
            connect_up: false,
            bidirectional: false,
            administrator: false,
        }
        .encode();
        bad[0] = 1;
        assert!(matches!(
            AuthFrame::decode(&bad),
            Err(ProtocolError::UnknownSystemFrameType(1))
        ));
    }
}
