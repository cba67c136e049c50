//! Password-checking authenticator for a single node's configured network.
//!
//! Grounded on `iocom_core::auth::AllowAllAuthenticator`'s shape, generalised
//! from "accept everything" to the one check a device console actually
//! performs: the incoming auth frame's network and password must match what
//! this node was configured with.

use iocom_core::auth::{AllowedNetwork, Authenticator};
use iocom_proto::payload::auth::AuthFrame;

/// Grants access to one configured network if the peer's auth frame names
/// it and presents the matching password.
#[derive(Debug, Clone)]
pub struct PasswordAuthenticator {
    network_name: String,
    password: String,
    password_tls: Option<String>,
}

impl PasswordAuthenticator {
    /// Creates an authenticator for `network_name`, accepting either
    /// `password` or `password_tls` (if configured) as the presented
    /// credential.
    #[must_use]
    pub fn new(network_name: String, password: String, password_tls: Option<String>) -> Self {
        Self { network_name, password, password_tls }
    }
}

impl Authenticator for PasswordAuthenticator {
    fn authenticate(
        &self,
        frame: &AuthFrame,
        remote_ip: &str,
    ) -> Result<Vec<AllowedNetwork>, String> {
        if frame.network_name != self.network_name {
            return Err(format!(
                "device '{}' requested unknown network '{}'",
                frame.device_name, frame.network_name
            ));
        }
        let accepted = frame.password == self.password
            || self.password_tls.as_deref().is_some_and(|tls| frame.password == tls);
        if !accepted {
            return Err(format!(
                "device '{}' at {remote_ip} presented an incorrect password",
                frame.device_name
            ));
        }
        Ok(vec![AllowedNetwork { network_name: self.network_name.clone(), administrator: false }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(network_name: &str, password: &str) -> AuthFrame {
        AuthFrame {
            device_name: "plc1".into(),
            device_nr: 1,
            network_name: network_name.into(),
            password: password.into(),
            connect_up: false,
            bidirectional: false,
            administrator: false,
        }
    }

    #[test]
    fn accepts_matching_network_and_password() {
        let auth = PasswordAuthenticator::new("factory".into(), "secret".into(), None);
        let allowed = auth.authenticate(&frame("factory", "secret"), "10.0.0.1").unwrap();
        assert_eq!(allowed.len(), 1);
        assert_eq!(allowed[0].network_name, "factory");
    }

    #[test]
    fn rejects_wrong_password() {
        let auth = PasswordAuthenticator::new("factory".into(), "secret".into(), None);
        assert!(auth.authenticate(&frame("factory", "wrong"), "10.0.0.1").is_err());
    }

    #[test]
    fn rejects_unknown_network() {
        let auth = PasswordAuthenticator::new("factory".into(), "secret".into(), None);
        assert!(auth.authenticate(&frame("other", "secret"), "10.0.0.1").is_err());
    }

    #[test]
    fn accepts_tls_password_as_alternate_credential() {
        let auth = PasswordAuthenticator::new(
            "factory".into(),
            "secret".into(),
            Some("stronger-secret".into()),
        );
        assert!(auth.authenticate(&frame("factory", "stronger-secret"), "10.0.0.1").is_ok());
        assert!(auth.authenticate(&frame("factory", "secret"), "10.0.0.1").is_ok());
    }
}
