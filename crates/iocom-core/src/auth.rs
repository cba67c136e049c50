//! Authentication handshake logic.
//!
//! Grounded on `ioc_process_received_authentication_frame`: each side sends
//! exactly one auth frame at connect time; the listening side hands the
//! decoded credentials to an [`Authenticator`], which grants a list of
//! allowed networks or rejects the connection outright. No other frame may
//! be processed before the auth frame has been both sent and received.

use iocom_proto::payload::auth::AuthFrame;

/// A network this connection is allowed to exchange data on, with the
/// privilege level granted by the authenticator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedNetwork {
    /// Network name.
    pub network_name: String,
    /// This side may act as an administrator on the network.
    pub administrator: bool,
}

/// Installed on the listening (server) side to authorise incoming devices.
///
/// Implementors should not block; this is called from inside the tick loop
/// while the connection's state is being mutated.
pub trait Authenticator: Send + Sync {
    /// Authenticates `frame` arriving from `remote_ip`. On success, returns
    /// the list of networks this device may use; on failure, returns an
    /// error describing why (surfaced to logs, never to the remote peer).
    fn authenticate(
        &self,
        frame: &AuthFrame,
        remote_ip: &str,
    ) -> Result<Vec<AllowedNetwork>, String>;
}

/// Accepts every device unconditionally on a single fixed network.
///
/// Useful for local/dev deployments and for tests; never use in production.
#[derive(Debug, Clone)]
pub struct AllowAllAuthenticator {
    /// The single network every device is granted access to.
    pub network_name: String,
}

impl Authenticator for AllowAllAuthenticator {
    fn authenticate(
        &self,
        _frame: &AuthFrame,
        _remote_ip: &str,
    ) -> Result<Vec<AllowedNetwork>, String> {
        Ok(vec![AllowedNetwork { network_name: self.network_name.clone(), administrator: false }])
    }
}

/// Tracks whether this side is authorised for `network_name`, consulted per
/// memory block before any data frame for that network is processed.
#[must_use]
pub fn is_authorised(allowed: &[AllowedNetwork], network_name: &str) -> bool {
    allowed.iter().any(|n| n.network_name == network_name)
}

/// Outcome of matching connect-direction flags from both sides' auth frames,
/// per the server-side alignment rule: if the peer declares itself
/// "connect up", the local up flag is cleared, and vice versa.
#[must_use]
pub fn resolve_connect_up(local_connect_up: bool, peer_connect_up: bool) -> bool {
    if peer_connect_up {
        false
    } else {
        local_connect_up
    }
}
