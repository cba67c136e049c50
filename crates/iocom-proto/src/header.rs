//! Frame header build and parse, for both wire variants.
//!
//! Grounded on `ioc_connection.h` (flag bit values, `IOC_MAX_FRAME_NR`,
//! `iocSendHeaderPtrs`). Serial and TCP/TLS frames share
//! the same logical fields but differ in byte layout: serial carries a
//! CRC-16 and a 1-byte payload size, TCP/TLS has no CRC and a 2-byte
//! payload size.

use crate::errors::{ProtocolError, Result};
use crate::ints;

/// Maximum frame size on a serial link.
pub const SERIAL_FRAME_SZ: usize = 96;
/// Maximum frame size on a TCP/TLS link.
pub const SOCKET_FRAME_SZ: usize = 464;

/// Frame numbers run 1..=200; 0 is used once, at connection start.
pub const MAX_FRAME_NR: u8 = 200;

/// Byte 0 value marking an acknowledgement frame instead of a data frame.
pub const ACK_SENTINEL: u8 = 0xFF;
/// Acknowledgement frame length on a serial link (sentinel + 2-byte rbytes).
pub const SERIAL_ACK_SZ: usize = 3;
/// Acknowledgement frame length on a TCP/TLS link.
pub const SOCKET_ACK_SZ: usize = 4;

bitflags::bitflags! {
    /// Frame header flag bits (byte `flags`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FrameFlags: u8 {
        /// Payload bytes are deltas (added onto the destination), not absolutes.
        const DELTA_ENCODED = 1;
        /// Payload is run-length compressed.
        const COMPRESSED = 2;
        /// `addr` is packed in 2 bytes (or 4, combined with `extra.ADDR_HAS_FOUR_BYTES`).
        const ADDR_HAS_TWO_BYTES = 4;
        /// `mblk_id` is packed in 2 bytes (or 4, combined with `extra.MBLK_HAS_FOUR_BYTES`).
        const MBLK_HAS_TWO_BYTES = 8;
        /// Target buffer should commit and publish after this frame.
        const SYNC_COMPLETE = 16;
        /// Payload is a system frame (mblk-info / auth / remove-mblk), not a data update.
        const SYSTEM_FRAME = 32;
        /// `extra_flags` byte follows `flags` in the header.
        const EXTRA_FLAGS = 128;
    }
}

bitflags::bitflags! {
    /// Extra flag bits (byte `extra_flags`, present iff `EXTRA_FLAGS` set).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExtraFlags: u8 {
        /// `addr` is packed in 4 bytes.
        const ADDR_HAS_FOUR_BYTES = 1;
        /// `mblk_id` is packed in 4 bytes.
        const MBLK_HAS_FOUR_BYTES = 2;
        /// Target buffer must not zero-fill shrunk ranges on commit.
        const NO_ZERO = 4;
    }
}

/// System frame sub-type, carried as payload byte 0 when `SYSTEM_FRAME` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemFrameType {
    /// Memory block info exchange.
    MblkInfo,
    /// Authentication data.
    Auth,
    /// Request to remove a dynamically created memory block.
    RemoveMblkRequest,
}

impl SystemFrameType {
    pub(crate) fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::MblkInfo),
            2 => Some(Self::Auth),
            3 => Some(Self::RemoveMblkRequest),
            _ => None,
        }
    }

    /// The wire byte identifying this system frame sub-type.
    #[must_use]
    pub fn to_byte(self) -> u8 {
        match self {
            Self::MblkInfo => 1,
            Self::Auth => 2,
            Self::RemoveMblkRequest => 3,
        }
    }
}

/// Which wire layout a frame uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Raw serial link: CRC-16 present, 1-byte payload size.
    Serial,
    /// TCP or TLS stream: no CRC, 2-byte payload size.
    Socket,
}

impl Transport {
    /// Maximum frame size for this transport.
    #[must_use]
    pub fn frame_sz(self) -> usize {
        match self {
            Self::Serial => SERIAL_FRAME_SZ,
            Self::Socket => SOCKET_FRAME_SZ,
        }
    }
}

/// A parsed or about-to-be-built frame header plus addressing fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Frame sequence number, 0 only as the very first frame on a link.
    pub frame_nr: u8,
    /// Flag bits.
    pub flags: FrameFlags,
    /// Extra flag bits; `ExtraFlags::empty()` when `EXTRA_FLAGS` is unset.
    pub extra_flags: ExtraFlags,
    /// Target memory block identifier for data frames; frame-local (often 0)
    /// for system frames.
    pub mblk_id: u32,
    /// Start address within the memory block for data frames.
    pub addr: u32,
    /// Number of payload bytes following the header.
    pub payload_size: u16,
}

impl Header {
    /// Returns the system frame type, if `SYSTEM_FRAME` is set and `payload`
    /// is non-empty.
    #[must_use]
    pub fn system_frame_type(&self, payload: &[u8]) -> Option<SystemFrameType> {
        if !self.flags.contains(FrameFlags::SYSTEM_FRAME) {
            return None;
        }
        payload.first().copied().and_then(SystemFrameType::from_byte)
    }
}

/// Size, in bytes, of the fixed-position portion of a header for `transport`
/// (frame_nr, flags[, crc], payload_size — not counting `extra_flags` or the
/// variable-width mblk_id/addr fields).
#[must_use]
pub fn fixed_header_sz(transport: Transport) -> usize {
    match transport {
        Transport::Serial => 5, // frame_nr, crc_lo, crc_hi, flags, payload_size
        Transport::Socket => 4, // frame_nr, flags, payload_size_lo, payload_size_hi
    }
}

/// Builds a frame into `dst`, writing header, `mblk_id`, `addr`, and
/// `payload` in sequence, computing CRC if `transport` is serial.
///
/// Returns the total number of bytes written. `header.payload_size` is
/// overwritten with `payload.len()` before encoding.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] if the frame would not fit in
/// `transport`'s frame size, or if `dst` is too small.
pub fn build_frame(
    transport: Transport,
    mut header: Header,
    payload: &[u8],
    dst: &mut [u8],
) -> Result<usize> {
    header.payload_size = payload.len() as u16;

    let (mblk_width, mblk_flag) = ints::width_for(header.mblk_id);
    let (addr_width, addr_flag) = ints::width_for(header.addr);

    let mut flags = header.flags;
    let mut extra = header.extra_flags;
    if mblk_flag & ints::TWO_BYTES != 0 {
        flags |= FrameFlags::MBLK_HAS_TWO_BYTES;
    }
    if mblk_flag & ints::FOUR_BYTES != 0 {
        flags |= FrameFlags::MBLK_HAS_TWO_BYTES;
        extra |= ExtraFlags::MBLK_HAS_FOUR_BYTES;
    }
    if addr_flag & ints::TWO_BYTES != 0 {
        flags |= FrameFlags::ADDR_HAS_TWO_BYTES;
    }
    if addr_flag & ints::FOUR_BYTES != 0 {
        flags |= FrameFlags::ADDR_HAS_TWO_BYTES;
        extra |= ExtraFlags::ADDR_HAS_FOUR_BYTES;
    }
    if !extra.is_empty() {
        flags |= FrameFlags::EXTRA_FLAGS;
    }

    let extra_sz = usize::from(flags.contains(FrameFlags::EXTRA_FLAGS));
    let total = fixed_header_sz(transport) + extra_sz + mblk_width + addr_width + payload.len();
    let max = transport.frame_sz();
    if total > max {
        return Err(ProtocolError::PayloadTooLarge { size: total, max });
    }
    if dst.len() < total {
        return Err(ProtocolError::PayloadTooLarge { size: total, max: dst.len() });
    }

    let mut crc_pos = 0usize;
    let mut i = 0usize;
    match transport {
        Transport::Serial => {
            dst[0] = header.frame_nr;
            crc_pos = 1;
            dst[1] = 0;
            dst[2] = 0;
            dst[3] = flags.bits();
            dst[4] = payload.len() as u8;
            i = 5;
        }
        Transport::Socket => {
            dst[0] = header.frame_nr;
            dst[1] = flags.bits();
            dst[2] = (payload.len() & 0xFF) as u8;
            dst[3] = (payload.len() >> 8) as u8;
            i = 4;
        }
    }

    if flags.contains(FrameFlags::EXTRA_FLAGS) {
        dst[i] = extra.bits();
        i += 1;
    }

    i += ints::pack(header.mblk_id, mblk_width, &mut dst[i..]);
    i += ints::pack(header.addr, addr_width, &mut dst[i..]);
    dst[i..i + payload.len()].copy_from_slice(payload);
    i += payload.len();

    if transport == Transport::Serial {
        let crc = crate::crc::crc16(&dst[..total]);
        dst[crc_pos] = (crc & 0xFF) as u8;
        dst[crc_pos + 1] = (crc >> 8) as u8;
    }

    Ok(i)
}

/// Parses a frame header and addressing fields from the front of `src`.
///
/// Returns `(header, bytes_before_payload)`; the payload itself is
/// `src[bytes_before_payload..bytes_before_payload + header.payload_size]`.
///
/// # Errors
///
/// Returns [`ProtocolError::HeaderTooShort`] if `src` is shorter than the
/// fixed header, [`ProtocolError::FrameTruncated`] if the declared payload
/// does not fit, or [`ProtocolError::CrcMismatch`] on a serial frame whose
/// checksum does not match.
pub fn parse_header(transport: Transport, src: &[u8]) -> Result<(Header, usize)> {
    let fixed = fixed_header_sz(transport);
    if src.len() < fixed {
        return Err(ProtocolError::HeaderTooShort { expected: fixed, actual: src.len() });
    }

    let (frame_nr, flags_byte, payload_size, mut i) = match transport {
        Transport::Serial => (src[0], src[3], usize::from(src[4]), 5usize),
        Transport::Socket => {
            (src[0], src[1], usize::from(src[2]) | (usize::from(src[3]) << 8), 4usize)
        }
    };
    let flags = FrameFlags::from_bits_truncate(flags_byte);

    let extra_flags = if flags.contains(FrameFlags::EXTRA_FLAGS) {
        if src.len() <= i {
            return Err(ProtocolError::HeaderTooShort { expected: i + 1, actual: src.len() });
        }
        let e = ExtraFlags::from_bits_truncate(src[i]);
        i += 1;
        e
    } else {
        ExtraFlags::empty()
    };

    let mblk_two = flags.contains(FrameFlags::MBLK_HAS_TWO_BYTES);
    let mblk_four = extra_flags.contains(ExtraFlags::MBLK_HAS_FOUR_BYTES);
    let mblk_width = if mblk_four { 4 } else if mblk_two { 2 } else { 1 };
    if src.len() < i + mblk_width {
        return Err(ProtocolError::HeaderTooShort { expected: i + mblk_width, actual: src.len() });
    }
    let (mblk_id, n) = ints::unpack(&src[i..], mblk_two, mblk_four);
    i += n;

    let addr_two = flags.contains(FrameFlags::ADDR_HAS_TWO_BYTES);
    let addr_four = extra_flags.contains(ExtraFlags::ADDR_HAS_FOUR_BYTES);
    let addr_width = if addr_four { 4 } else if addr_two { 2 } else { 1 };
    if src.len() < i + addr_width {
        return Err(ProtocolError::HeaderTooShort { expected: i + addr_width, actual: src.len() });
    }
    let (addr, n) = ints::unpack(&src[i..], addr_two, addr_four);
    i += n;

    if src.len() < i + payload_size {
        return Err(ProtocolError::FrameTruncated { expected: payload_size, actual: src.len() - i });
    }

    if transport == Transport::Serial {
        let frame_end = i + payload_size;
        let mut check_buf = src[..frame_end].to_vec();
        check_buf[1] = 0;
        check_buf[2] = 0;
        let computed = crate::crc::crc16(&check_buf);
        let transmitted = u16::from(src[1]) | (u16::from(src[2]) << 8);
        if computed != transmitted {
            return Err(ProtocolError::CrcMismatch { expected: transmitted, computed });
        }
    }

    Ok((
        Header {
            frame_nr,
            flags,
            extra_flags,
            mblk_id,
            addr,
            payload_size: payload_size as u16,
        },
        i,
    ))
}

/// Writes an acknowledgement frame (sentinel byte + low 16 bits of
/// `bytes_received`) into `dst`, returning the number of bytes written.
#[must_use]
pub fn build_ack(transport: Transport, bytes_received: u16, dst: &mut [u8]) -> usize {
    dst[0] = ACK_SENTINEL;
    dst[1] = (bytes_received & 0xFF) as u8;
    dst[2] = (bytes_received >> 8) as u8;
    match transport {
        Transport::Serial => {
            dst[3] = 0;
            SERIAL_ACK_SZ
        }
        Transport::Socket => SOCKET_ACK_SZ,
    }
}

/// Returns `Some(bytes_received)` if `src` begins with an ACK sentinel.
#[must_use]
pub fn parse_ack(src: &[u8]) -> Option<u16> {
    if src.first() != Some(&ACK_SENTINEL) || src.len() < 3 {
        return None;
    }
    Some(u16::from(src[1]) | (u16::from(src[2]) << 8))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header(mblk_id: u32, addr: u32) -> Header {
        Header {
            frame_nr: 1,
            flags: FrameFlags::empty(),
            extra_flags: ExtraFlags::empty(),
            mblk_id,
            addr,
            payload_size: 0,
        }
    }

    #[test]
    fn socket_roundtrip_small_ids() {
        let mut buf = [0u8; SOCKET_FRAME_SZ];
        let payload = b"hello";
        let n = build_frame(Transport::Socket, sample_header(3, 10), payload, &mut buf).unwrap();
        let (parsed, offset) = parse_header(Transport::Socket, &buf[..n]).unwrap();
        assert_eq!(parsed.mblk_id, 3);
        assert_eq!(parsed.addr, 10);
        assert_eq!(parsed.payload_size as usize, payload.len());
        assert_eq!(&buf[offset..offset + payload.len()], payload);
    }

    #[test]
    fn socket_roundtrip_wide_ids_sets_extra_flags() {
        let mut buf = [0u8; SOCKET_FRAME_SZ];
        let payload = b"x";
        let n =
            build_frame(Transport::Socket, sample_header(70_000, 500_000), payload, &mut buf)
                .unwrap();
        let (parsed, _) = parse_header(Transport::Socket, &buf[..n]).unwrap();
        assert_eq!(parsed.mblk_id, 70_000);
        assert_eq!(parsed.addr, 500_000);
        assert!(parsed.flags.contains(FrameFlags::EXTRA_FLAGS));
        assert!(parsed.extra_flags.contains(ExtraFlags::MBLK_HAS_FOUR_BYTES));
        assert!(parsed.extra_flags.contains(ExtraFlags::ADDR_HAS_FOUR_BYTES));
    }

    #[test]
    fn serial_roundtrip_includes_valid_crc() {
        let mut buf = [0u8; SERIAL_FRAME_SZ];
        let payload = b"abcd";
        let n = build_frame(Transport::Serial, sample_header(1, 2), payload, &mut buf).unwrap();
        let (parsed, offset) = parse_header(Transport::Serial, &buf[..n]).unwrap();
        assert_eq!(parsed.payload_size as usize, payload.len());
        assert_eq!(&buf[offset..offset + payload.len()], payload);
    }

    #[test]
    fn serial_corrupted_byte_fails_crc() {
        let mut buf = [0u8; SERIAL_FRAME_SZ];
        let n = build_frame(Transport::Serial, sample_header(1, 2), b"abcd", &mut buf).unwrap();
        buf[n - 1] ^= 0xFF;
        assert!(matches!(
            parse_header(Transport::Serial, &buf[..n]),
            Err(ProtocolError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn ack_frame_roundtrip() {
        let mut buf = [0u8; 4];
        let n = build_ack(Transport::Socket, 0xBEEF, &mut buf);
        assert_eq!(n, SOCKET_ACK_SZ);
        assert_eq!(parse_ack(&buf), Some(0xBEEF));
    }

    #[test]
    fn non_ack_frame_not_mistaken_for_ack() {
        let mut buf = [0u8; SOCKET_FRAME_SZ];
        build_frame(Transport::Socket, sample_header(1, 1), b"hi", &mut buf).unwrap();
        assert_eq!(parse_ack(&buf), None);
    }

    #[test]
    fn header_too_short_reported() {
        assert!(matches!(
            parse_header(Transport::Socket, &[1, 2]),
            Err(ProtocolError::HeaderTooShort { .. })
        ));
    }
}
