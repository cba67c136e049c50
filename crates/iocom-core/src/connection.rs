//! Per-link connection state machine.
//!
//! Ties together the serial handshake, authentication, flow control, and
//! memory-block exchange into one action-pattern state machine: methods take
//! `now` and return actions for a driver to execute, so the same logic runs
//! against real transports and a deterministic simulation. Built around a
//! state/action split: send-auth-then-mblk-info sequencing and continuous
//! keep-alive/silence supervision, rather than a single request/reply
//! handshake.

use std::ops::Sub;
use std::time::Duration;

use iocom_proto::header::{self, Header, SystemFrameType, Transport};
use iocom_proto::payload::auth::AuthFrame;
use iocom_proto::payload::mblk_info::MblkInfo;
use iocom_proto::payload::remove_mblk::RemoveMblkRequest;
use tracing::{debug, warn};

use crate::auth::{AllowedNetwork, Authenticator};
use crate::error::ConnectionError;
use crate::flow::{self, FlowCounters};
use crate::mblk::LinkTimings;
use crate::sbuf::FramePlan;

/// Actions returned by the connection state machine for a driver to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Write these bytes to the transport, in order.
    SendBytes(Vec<u8>),
    /// Close the link with this reason.
    Close {
        /// Human-readable reason, logged by the driver.
        reason: String,
    },
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport is up; the local auth frame has not been sent yet.
    Connecting,
    /// Auth frame sent; waiting to both send and receive before any other
    /// frame is processed.
    AwaitingAuth,
    /// Authenticated in both directions; data and mblk-info frames flow.
    Open,
    /// Link closed (error, timeout, or explicit shutdown).
    Closed,
}

/// Static configuration for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Wire transport in use; selects frame size and CRC presence.
    pub transport: Transport,
    /// Keep-alive/silence thresholds for this transport.
    pub timings: LinkTimings,
    /// This side's device name, sent in the auth frame.
    pub device_name: String,
    /// Device number, or [`iocom_proto::AUTO_DEVICE_NR`] to request assignment.
    pub device_nr: u32,
    /// Network to authenticate against.
    pub network_name: String,
    /// Shared-secret password for a clear-text link, sent in the auth frame.
    pub password: String,
    /// Password to send instead of `password` when `is_tls` is set, for
    /// deployments that use a stronger secret over an encrypted link.
    /// Falls back to `password` if unset.
    pub password_tls: Option<String>,
    /// Whether this link is carried over TLS; selects `password_tls` over
    /// `password` when sending the auth frame.
    pub is_tls: bool,
    /// This side initiates the "connect up" relationship (overridden if the
    /// peer also claims it, per [`crate::auth::resolve_connect_up`]).
    pub connect_up: bool,
    /// This side supports bidirectional replication.
    pub bidirectional: bool,
}

impl ConnectionConfig {
    fn auth_password(&self) -> &str {
        if self.is_tls {
            self.password_tls.as_deref().unwrap_or(&self.password)
        } else {
            &self.password
        }
    }
}

/// Event surfaced to the fabric layer after processing an inbound frame;
/// memory-block binding itself is out of scope here (it needs the node-wide
/// block registry, which this sans-I/O type does not own).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The peer's auth frame was accepted; these networks are now usable.
    AuthAccepted(Vec<AllowedNetwork>),
    /// The peer advertised a memory block.
    MblkInfo(MblkInfo),
    /// The peer asked to remove a memory block.
    RemoveMblk(RemoveMblkRequest),
}

/// One link's protocol state machine, generic over the instant type so it
/// runs under both real and simulated time.
#[derive(Debug)]
pub struct Connection<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    state: ConnectionState,
    config: ConnectionConfig,
    flow: FlowCounters,
    last_sent: I,
    last_received: I,
    auth_sent: bool,
    auth_received: bool,
    allowed_networks: Vec<AllowedNetwork>,
    frame_nr_out: u8,
}

impl<I> Connection<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Creates a new connection in [`ConnectionState::Connecting`].
    #[must_use]
    pub fn new(now: I, config: ConnectionConfig) -> Self {
        let flow =
            if config.transport == Transport::Serial { FlowCounters::serial() } else { FlowCounters::tcp() };
        Self {
            state: ConnectionState::Connecting,
            config,
            flow,
            last_sent: now,
            last_received: now,
            auth_sent: false,
            auth_received: false,
            allowed_networks: Vec::new(),
            frame_nr_out: 0,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Networks this side is authorised to exchange data on. Empty until
    /// [`ConnectionEvent::AuthAccepted`] has been processed.
    #[must_use]
    pub fn allowed_networks(&self) -> &[AllowedNetwork] {
        &self.allowed_networks
    }

    /// True once both sides have exchanged auth frames.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Builds and sends this side's auth frame; the first action on every
    /// connection regardless of transport.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidState`] if called more than once.
    pub fn send_auth(&mut self, now: I) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if self.state != ConnectionState::Connecting {
            return Err(ConnectionError::InvalidState { state: self.state, operation: "send_auth" });
        }
        let frame = AuthFrame {
            device_name: self.config.device_name.clone(),
            device_nr: self.config.device_nr,
            network_name: self.config.network_name.clone(),
            password: self.config.auth_password().to_string(),
            connect_up: self.config.connect_up,
            bidirectional: self.config.bidirectional,
            administrator: false,
        };
        let bytes = self.frame_system(frame.encode());
        self.auth_sent = true;
        self.state = ConnectionState::AwaitingAuth;
        self.last_sent = now;
        self.flow.on_sent(bytes.len() as u16);
        Ok(vec![ConnectionAction::SendBytes(bytes)])
    }

    /// Processes one decoded header + payload pair and returns any events
    /// raised plus any frames that must be sent immediately in response
    /// (currently none require an immediate reply beyond auth completion).
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Protocol`] on a malformed system frame, or
    /// [`ConnectionError::UnauthorisedNetwork`] if a non-auth frame arrives
    /// before authentication completes.
    pub fn handle_frame(
        &mut self,
        header: &Header,
        payload: &[u8],
        authenticator: &dyn Authenticator,
        remote_ip: &str,
        now: I,
    ) -> Result<Vec<ConnectionEvent>, ConnectionError> {
        self.last_received = now;
        self.flow.on_received(u16::try_from(payload.len()).unwrap_or(u16::MAX));

        let Some(frame_type) = header.system_frame_type(payload) else {
            if !self.is_open() {
                return Err(ConnectionError::UnauthorisedNetwork(
                    "data frame before authentication completed".to_string(),
                ));
            }
            return Ok(vec![]);
        };

        match frame_type {
            SystemFrameType::Auth => {
                let frame = AuthFrame::decode(payload)?;
                let allowed = authenticator
                    .authenticate(&frame, remote_ip)
                    .map_err(ConnectionError::AuthenticationRejected)?;
                self.allowed_networks = allowed.clone();
                self.auth_received = true;
                if self.auth_sent {
                    self.state = ConnectionState::Open;
                    debug!(device = %frame.device_name, networks = allowed.len(), "connection open");
                }
                Ok(vec![ConnectionEvent::AuthAccepted(allowed)])
            }
            SystemFrameType::MblkInfo => {
                self.require_open("mblk_info")?;
                Ok(vec![ConnectionEvent::MblkInfo(MblkInfo::decode(payload)?)])
            }
            SystemFrameType::RemoveMblkRequest => {
                self.require_open("remove_mblk_request")?;
                Ok(vec![ConnectionEvent::RemoveMblk(RemoveMblkRequest::decode(payload)?)])
            }
        }
    }

    /// Builds and sends an mblk-info advertisement for one locally-owned
    /// block. Callers advertise every locally-owned block once the
    /// connection reaches [`ConnectionState::Open`].
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidState`] unless the connection is
    /// open.
    pub fn send_mblk_info(&mut self, info: &MblkInfo, now: I) -> Result<Vec<ConnectionAction>, ConnectionError> {
        self.require_open("send_mblk_info")?;
        let bytes = self.frame_system(info.encode());
        self.last_sent = now;
        self.flow.on_sent(bytes.len() as u16);
        Ok(vec![ConnectionAction::SendBytes(bytes)])
    }

    /// Builds and sends one outbound data frame carrying `plan` (from a
    /// [`crate::sbuf::SourceBuffer::prepare`] call) for memory block
    /// `mblk_id`, compressing the payload when that actually shrinks it.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidState`] unless the connection is
    /// open, or [`ConnectionError::Protocol`] if the frame does not fit in
    /// one transport frame.
    pub fn send_data_frame(
        &mut self,
        mblk_id: u32,
        plan: &FramePlan,
        now: I,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        self.require_open("send_data_frame")?;

        let mut packed = vec![0u8; plan.data.len() * 2 + 2];
        let (payload, compressed): (&[u8], bool) =
            match iocom_proto::compress::compress(&plan.data, &mut packed) {
                Some(result) if result.src_consumed == plan.data.len() => {
                    (&packed[..result.written], true)
                }
                _ => (plan.data.as_slice(), false),
            };

        let mut flags = iocom_proto::FrameFlags::SYNC_COMPLETE;
        if !plan.is_keyframe {
            flags |= iocom_proto::FrameFlags::DELTA_ENCODED;
        }
        if compressed {
            flags |= iocom_proto::FrameFlags::COMPRESSED;
        }

        let header = Header {
            frame_nr: self.next_frame_nr(),
            flags,
            extra_flags: iocom_proto::ExtraFlags::empty(),
            mblk_id,
            addr: plan.start as u32,
            payload_size: 0,
        };
        let mut buf = vec![0u8; self.config.transport.frame_sz()];
        let n = header::build_frame(self.config.transport, header, payload, &mut buf)?;
        buf.truncate(n);
        self.last_sent = now;
        self.flow.on_sent(buf.len() as u16);
        Ok(vec![ConnectionAction::SendBytes(buf)])
    }

    fn require_open(&self, operation: &'static str) -> Result<(), ConnectionError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(ConnectionError::InvalidState { state: self.state, operation })
        }
    }

    /// Records that `payload` was framed and handed to the transport.
    pub fn on_sent(&mut self, payload_len: u16, now: I) {
        self.flow.on_sent(payload_len);
        self.last_sent = now;
    }

    /// Applies an ACK carrying the peer's acknowledged byte count.
    pub fn on_ack_received(&mut self, peer_bytes_received: u16, now: I) {
        self.flow.on_ack(peer_bytes_received);
        self.last_received = now;
    }

    /// True if a frame of `payload_len` bytes may be sent without exceeding
    /// the in-air limit for this link.
    #[must_use]
    pub fn may_send(&self, payload_len: u16) -> bool {
        self.flow.may_send(payload_len)
    }

    /// Periodic maintenance: detects silence timeout and emits a keep-alive
    /// ACK when due. Call on every driver tick.
    pub fn tick(&mut self, now: I) -> Vec<ConnectionAction> {
        if self.state == ConnectionState::Closed {
            return vec![];
        }

        let since_receive = now - self.last_received;
        if flow::silence_exceeded(since_receive, self.config.timings.silence) {
            self.state = ConnectionState::Closed;
            warn!(device = %self.config.device_name, elapsed = ?since_receive, "link silent, closing");
            return vec![ConnectionAction::Close {
                reason: format!("silence timeout after {since_receive:?}"),
            }];
        }

        let mut actions = Vec::new();
        let since_send = now - self.last_sent;
        if flow::keepalive_due(since_send, self.config.timings.keepalive) || self.flow.ack_due() {
            let mut buf = vec![0u8; header::SOCKET_ACK_SZ.max(header::SERIAL_ACK_SZ)];
            let n = header::build_ack(self.config.transport, self.flow.bytes_received(), &mut buf);
            buf.truncate(n);
            self.flow.on_ack_sent();
            self.last_sent = now;
            actions.push(ConnectionAction::SendBytes(buf));
        }
        actions
    }

    /// Closes the connection unconditionally, e.g. on transport error.
    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }

    fn frame_system(&mut self, payload: Vec<u8>) -> Vec<u8> {
        let header = Header {
            frame_nr: self.next_frame_nr(),
            flags: iocom_proto::FrameFlags::SYSTEM_FRAME | iocom_proto::FrameFlags::SYNC_COMPLETE,
            extra_flags: iocom_proto::ExtraFlags::empty(),
            mblk_id: 0,
            addr: 0,
            payload_size: 0,
        };
        let mut buf = vec![0u8; self.config.transport.frame_sz()];
        let n = header::build_frame(self.config.transport, header, &payload, &mut buf)
            .unwrap_or(0);
        buf.truncate(n);
        buf
    }

    /// `0` is emitted exactly once, as the very first frame after the
    /// connection resets; afterwards the sequence cycles `1..=MAX_FRAME_NR`
    /// and never repeats `0`.
    fn next_frame_nr(&mut self) -> u8 {
        let nr = self.frame_nr_out;
        self.frame_nr_out =
            if self.frame_nr_out >= iocom_proto::MAX_FRAME_NR { 1 } else { self.frame_nr_out + 1 };
        nr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AllowAllAuthenticator;
    use std::time::{Duration as StdDuration, Instant};

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            transport: Transport::Socket,
            timings: LinkTimings::TCP,
            device_name: "dev1".into(),
            device_nr: 1,
            network_name: "net".into(),
            password: "pw".into(),
            password_tls: None,
            is_tls: false,
            connect_up: true,
            bidirectional: false,
        }
    }

    #[test]
    fn send_auth_transitions_to_awaiting() {
        let t0 = Instant::now();
        let mut conn = Connection::new(t0, config());
        let actions = conn.send_auth(t0).unwrap();
        assert_eq!(conn.state(), ConnectionState::AwaitingAuth);
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn second_send_auth_is_rejected() {
        let t0 = Instant::now();
        let mut conn = Connection::new(t0, config());
        conn.send_auth(t0).unwrap();
        assert!(conn.send_auth(t0).is_err());
    }

    #[test]
    fn mblk_info_before_auth_is_rejected() {
        let t0 = Instant::now();
        let mut conn = Connection::new(t0, config());
        let info = MblkInfo {
            device_nr: 1,
            nbytes: 8,
            mblk_flags: 0,
            device_name: None,
            network_name: None,
            mblk_name: None,
        };
        let mut buf = vec![0u8; Transport::Socket.frame_sz()];
        let payload = info.encode();
        let header = Header {
            frame_nr: 0,
            flags: iocom_proto::FrameFlags::SYSTEM_FRAME,
            extra_flags: iocom_proto::ExtraFlags::empty(),
            mblk_id: 0,
            addr: 0,
            payload_size: 0,
        };
        let n = header::build_frame(Transport::Socket, header, &payload, &mut buf).unwrap();
        let (parsed, hdr_len) = header::parse_header(Transport::Socket, &buf[..n]).unwrap();
        let auth = AllowAllAuthenticator { network_name: "net".into() };
        let result = conn.handle_frame(&parsed, &buf[hdr_len..n], &auth, "127.0.0.1", t0);
        assert!(result.is_err());
    }

    #[test]
    fn silence_timeout_closes_connection() {
        let t0 = Instant::now();
        let mut conn = Connection::new(t0, config());
        let later = t0 + StdDuration::from_secs(21);
        let actions = conn.tick(later);
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(matches!(actions.first(), Some(ConnectionAction::Close { .. })));
    }

    #[test]
    fn keepalive_emits_ack_when_due() {
        let t0 = Instant::now();
        let mut conn = Connection::new(t0, config());
        let later = t0 + StdDuration::from_secs(11);
        let actions = conn.tick(later);
        assert!(matches!(actions.first(), Some(ConnectionAction::SendBytes(_))));
    }

    #[test]
    fn frame_nr_sequence_never_repeats_zero() {
        let t0 = Instant::now();
        let mut conn = Connection::new(t0, config());
        let first = conn.next_frame_nr();
        assert_eq!(first, 0);
        for expected in 1..=iocom_proto::MAX_FRAME_NR {
            assert_eq!(conn.next_frame_nr(), expected);
        }
        // Wrapped past MAX_FRAME_NR: back to 1, never 0 again.
        assert_eq!(conn.next_frame_nr(), 1);
    }

    #[test]
    fn send_data_frame_requires_open_connection() {
        let t0 = Instant::now();
        let mut conn = Connection::new(t0, config());
        let plan = FramePlan { start: 0, data: vec![1, 2, 3], is_keyframe: true };
        assert!(conn.send_data_frame(8, &plan, t0).is_err());
    }

    #[test]
    fn send_data_frame_emits_bytes_once_open() {
        let t0 = Instant::now();
        let mut conn = Connection::new(t0, config());
        conn.send_auth(t0).unwrap();
        conn.state = ConnectionState::Open;

        let plan = FramePlan { start: 2, data: vec![9, 9, 9], is_keyframe: false };
        let actions = conn.send_data_frame(8, &plan, t0).unwrap();
        let Some(ConnectionAction::SendBytes(bytes)) = actions.into_iter().next() else {
            panic!("expected SendBytes action")
        };
        let (header, offset) = header::parse_header(Transport::Socket, &bytes).unwrap();
        assert_eq!(header.mblk_id, 8);
        assert_eq!(header.addr, 2);
        assert!(header.flags.contains(iocom_proto::FrameFlags::DELTA_ENCODED));
        assert!(header.flags.contains(iocom_proto::FrameFlags::SYNC_COMPLETE));
        assert!(!header.flags.contains(iocom_proto::FrameFlags::SYSTEM_FRAME));
        let _ = offset;
    }

    #[test]
    fn may_send_blocks_once_the_link_is_saturated() {
        let t0 = Instant::now();
        let mut conn = Connection::new(t0, config());
        conn.send_auth(t0).unwrap();
        conn.state = ConnectionState::Open;

        assert!(conn.may_send(1));
        conn.flow.on_sent(u16::try_from(flow::TCP_MAX_IN_AIR).unwrap());
        assert!(!conn.may_send(1));

        // An ACK covering everything sent frees the budget back up.
        conn.on_ack_received(u16::try_from(flow::TCP_MAX_IN_AIR).unwrap(), t0);
        assert!(conn.may_send(1));
    }
}
