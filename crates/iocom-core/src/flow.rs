//! Flow control and keep-alive arithmetic.
//!
//! Pure byte-counter bookkeeping; the connection engine calls into this on
//! every tick and every send/receive/ACK event. All counters wrap at 2^16,
//! matching the 16-bit `bytes_sent`/`bytes_received` fields carried on the
//! wire.

use std::time::Duration;

/// Typical serial-link thresholds: `UNACK_LIMIT = 40`,
/// `MAX_IN_AIR = RX_BUF - 1 - UNACK_LIMIT - 5 * ACK_SZ` with `RX_BUF = 256`.
pub const SERIAL_UNACK_LIMIT: u16 = 40;
/// Matches a 256-byte receive buffer and a 3-byte serial ACK frame.
pub const SERIAL_MAX_IN_AIR: u16 = 256 - 1 - SERIAL_UNACK_LIMIT - 5 * 3;

/// Typical TCP/TLS thresholds: `UNACK_LIMIT = 500`, `MAX_IN_AIR = 44 * FRAME_SZ`.
pub const TCP_UNACK_LIMIT: u16 = 500;
/// `44 * IOC_SOCKET_FRAME_SZ`.
pub const TCP_MAX_IN_AIR: u32 = 44 * iocom_proto::SOCKET_FRAME_SZ as u32;

/// Sender- and receiver-side byte counters for one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowCounters {
    bytes_sent: u16,
    processed_bytes: u16,
    bytes_received: u16,
    bytes_acknowledged: u16,
    max_in_air: u32,
    unacknowledged_limit: u16,
}

impl FlowCounters {
    /// Creates fresh counters (all zero) for a link with the given limits.
    #[must_use]
    pub fn new(max_in_air: u32, unacknowledged_limit: u16) -> Self {
        Self {
            bytes_sent: 0,
            processed_bytes: 0,
            bytes_received: 0,
            bytes_acknowledged: 0,
            max_in_air,
            unacknowledged_limit,
        }
    }

    /// Serial-link counters with the typical thresholds.
    #[must_use]
    pub fn serial() -> Self {
        Self::new(u32::from(SERIAL_MAX_IN_AIR), SERIAL_UNACK_LIMIT)
    }

    /// TCP/TLS counters with the typical thresholds.
    #[must_use]
    pub fn tcp() -> Self {
        Self::new(TCP_MAX_IN_AIR, TCP_UNACK_LIMIT)
    }

    /// Resets all counters to zero, as on a fresh connection.
    pub fn reset(&mut self) {
        *self = Self::new(self.max_in_air, self.unacknowledged_limit);
    }

    /// Bytes sent but not yet acknowledged as processed by the peer.
    #[must_use]
    pub fn in_air(&self) -> u16 {
        self.bytes_sent.wrapping_sub(self.processed_bytes)
    }

    /// True if a frame of `k` bytes may be sent without exceeding `max_in_air`.
    #[must_use]
    pub fn may_send(&self, k: u16) -> bool {
        u32::from(self.in_air()) + u32::from(k) <= self.max_in_air
    }

    /// Records that `k` bytes were just sent.
    pub fn on_sent(&mut self, k: u16) {
        self.bytes_sent = self.bytes_sent.wrapping_add(k);
    }

    /// Records that `k` bytes were just received.
    pub fn on_received(&mut self, k: u16) {
        self.bytes_received = self.bytes_received.wrapping_add(k);
    }

    /// Applies an ACK carrying the peer's view of `bytes_received`.
    pub fn on_ack(&mut self, peer_bytes_received: u16) {
        self.processed_bytes = peer_bytes_received;
    }

    /// True if enough unacknowledged bytes have accumulated that an ACK
    /// should be sent now.
    #[must_use]
    pub fn ack_due(&self) -> bool {
        self.bytes_received.wrapping_sub(self.bytes_acknowledged) >= self.unacknowledged_limit
    }

    /// Call after sending an ACK: records the acknowledged watermark.
    pub fn on_ack_sent(&mut self) {
        self.bytes_acknowledged = self.bytes_received;
    }

    /// Low 16 bits to put in an outgoing ACK frame.
    #[must_use]
    pub fn bytes_received(&self) -> u16 {
        self.bytes_received
    }
}

/// True if `elapsed` since the last send means a keep-alive ACK is due.
#[must_use]
pub fn keepalive_due(elapsed_since_last_send: Duration, keepalive: Duration) -> bool {
    elapsed_since_last_send >= keepalive
}

/// True if `elapsed` since the last receive means the link must be declared
/// broken.
#[must_use]
pub fn silence_exceeded(elapsed_since_last_receive: Duration, silence: Duration) -> bool {
    elapsed_since_last_receive >= silence
}
