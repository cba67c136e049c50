//! Serial connection handshake.
//!
//! Raw serial has no framing, so both ends must agree on a fresh start
//! before ordinary frames are meaningful. Grounded on
//! `ioc_establish_serial_connection.c`'s control-byte exchange: control
//! bytes 249..255 are reserved, with 253=CONNECT, 252=CONNECT_REPLY,
//! 251=CONFIRM, 250=CONFIRM_REPLY, 249=DISCONNECT, 255=ACK sentinel.

use std::time::Duration;

/// Control byte sent by the initiator to start a handshake.
pub const CONNECT: u8 = 253;
/// Control byte sent by the responder after seeing `CONNECT`.
pub const CONNECT_REPLY: u8 = 252;
/// Control byte sent by the initiator after seeing `CONNECT_REPLY`.
pub const CONFIRM: u8 = 251;
/// Control byte sent by the responder after seeing `CONFIRM`.
pub const CONFIRM_REPLY: u8 = 250;
/// Control byte sent once by the responder before it starts listening.
pub const DISCONNECT: u8 = 249;

/// How often the initiator resends `CONNECT` while waiting for a reply.
pub const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(300);

/// Handshake state, independent for initiator and responder roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Initiator: about to (re)send `CONNECT`.
    SendConnect,
    /// Initiator: `CONNECT` sent, waiting for `CONNECT_REPLY`.
    AwaitConnectReply,
    /// Initiator: `CONFIRM` sent, waiting for `CONFIRM_REPLY`.
    AwaitConfirmReply,
    /// Responder: `DISCONNECT` sent once, waiting for `CONNECT`.
    AwaitConnect,
    /// Responder: `CONNECT_REPLY` sent, waiting for `CONFIRM`.
    AwaitConfirm,
    /// Handshake complete; ordinary framing may begin.
    Connected,
}

/// Byte the driver should write to the wire, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeAction(pub u8);

/// Drives the initiator side of the serial handshake.
///
/// Generic over `Instant` so it can run under simulated or real time.
#[derive(Debug, Clone)]
pub struct Initiator<I> {
    state: HandshakeState,
    last_connect_sent: Option<I>,
}

impl<I: Copy + Ord + std::ops::Sub<Output = Duration>> Initiator<I> {
    /// Starts a new handshake attempt.
    #[must_use]
    pub fn new() -> Self {
        Self { state: HandshakeState::SendConnect, last_connect_sent: None }
    }

    /// Current handshake state.
    #[must_use]
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Advances on a tick; returns a byte to send, if the retry interval has
    /// elapsed or this is the first attempt.
    pub fn tick(&mut self, now: I) -> Option<HandshakeAction> {
        if self.state != HandshakeState::SendConnect && self.state != HandshakeState::AwaitConnectReply
        {
            return None;
        }
        let due = match self.last_connect_sent {
            None => true,
            Some(last) => now - last >= CONNECT_RETRY_INTERVAL,
        };
        if due {
            self.last_connect_sent = Some(now);
            self.state = HandshakeState::AwaitConnectReply;
            return Some(HandshakeAction(CONNECT));
        }
        None
    }

    /// Processes a received control byte; returns a byte to send in
    /// response, if any.
    pub fn on_byte(&mut self, byte: u8) -> Option<HandshakeAction> {
        match (self.state, byte) {
            (HandshakeState::AwaitConnectReply, CONNECT_REPLY) => {
                self.state = HandshakeState::AwaitConfirmReply;
                Some(HandshakeAction(CONFIRM))
            }
            (HandshakeState::AwaitConfirmReply, CONFIRM_REPLY) => {
                self.state = HandshakeState::Connected;
                None
            }
            _ => None,
        }
    }
}

impl<I: Copy + Ord + std::ops::Sub<Output = Duration>> Default for Initiator<I> {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives the responder (listener) side of the serial handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Responder {
    state: HandshakeState,
    disconnect_sent: bool,
}

impl Responder {
    /// Starts a new handshake attempt.
    #[must_use]
    pub fn new() -> Self {
        Self { state: HandshakeState::AwaitConnect, disconnect_sent: false }
    }

    /// Current handshake state.
    #[must_use]
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Called once to flush and announce a fresh listen; returns the
    /// `DISCONNECT` byte the first time, nothing after.
    pub fn announce(&mut self) -> Option<HandshakeAction> {
        if self.disconnect_sent {
            return None;
        }
        self.disconnect_sent = true;
        Some(HandshakeAction(DISCONNECT))
    }

    /// Processes a received control byte; returns a byte to send in
    /// response, if any. Any unexpected byte while awaiting `CONFIRM`
    /// returns the handshake to `AwaitConnect`.
    pub fn on_byte(&mut self, byte: u8) -> Option<HandshakeAction> {
        match (self.state, byte) {
            (HandshakeState::AwaitConnect, CONNECT) => {
                self.state = HandshakeState::AwaitConfirm;
                Some(HandshakeAction(CONNECT_REPLY))
            }
            (HandshakeState::AwaitConfirm, CONFIRM) => {
                self.state = HandshakeState::Connected;
                Some(HandshakeAction(CONFIRM_REPLY))
            }
            (HandshakeState::AwaitConfirm, _) => {
                self.state = HandshakeState::AwaitConnect;
                self.disconnect_sent = false;
                None
            }
            _ => None,
        }
    }
}

impl Default for Responder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn full_handshake_reaches_connected_on_both_sides() {
        let mut initiator = Initiator::<Instant>::new();
        let mut responder = Responder::new();
        let t0 = Instant::now();

        assert_eq!(responder.announce(), Some(HandshakeAction(DISCONNECT)));
        let connect = initiator.tick(t0).unwrap();
        assert_eq!(connect, HandshakeAction(CONNECT));

        let reply = responder.on_byte(connect.0).unwrap();
        assert_eq!(reply, HandshakeAction(CONNECT_REPLY));

        let confirm = initiator.on_byte(reply.0).unwrap();
        assert_eq!(confirm, HandshakeAction(CONFIRM));

        let confirm_reply = responder.on_byte(confirm.0).unwrap();
        assert_eq!(confirm_reply, HandshakeAction(CONFIRM_REPLY));

        assert!(initiator.on_byte(confirm_reply.0).is_none());
        assert_eq!(initiator.state(), HandshakeState::Connected);
        assert_eq!(responder.state(), HandshakeState::Connected);
    }

    #[test]
    fn initiator_retries_connect_every_300ms() {
        let mut initiator = Initiator::<Instant>::new();
        let t0 = Instant::now();
        assert!(initiator.tick(t0).is_some());
        assert!(initiator.tick(t0 + Duration::from_millis(100)).is_none());
        assert!(initiator.tick(t0 + Duration::from_millis(300)).is_some());
    }

    #[test]
    fn responder_resets_on_unexpected_byte_while_awaiting_confirm() {
        let mut responder = Responder::new();
        responder.on_byte(CONNECT);
        assert_eq!(responder.state(), HandshakeState::AwaitConfirm);
        responder.on_byte(0x42);
        assert_eq!(responder.state(), HandshakeState::AwaitConnect);
    }
}
