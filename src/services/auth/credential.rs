use std::fmt;

use axum::http::HeaderValue;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::claims::Identity;

/// A validated bearer credential for the lifetime of one request.
///
/// Holds the original `Authorization` header value so the forwarding path can
/// pass it on byte-for-byte. Key material never shows up in `Debug` output.
#[derive(Clone)]
pub struct IncomingCredential {
    authorization: HeaderValue,
    token: String,
    identity: Identity,
    claims: Map<String, Value>,
}

impl IncomingCredential {
    pub fn new(
        authorization: HeaderValue,
        token: String,
        identity: Identity,
        claims: Map<String, Value>,
    ) -> Self {
        let mut authorization = authorization;
        authorization.set_sensitive(true);
        Self {
            authorization,
            token,
            identity,
            claims,
        }
    }

    /// The inbound `Authorization` header, exactly as received.
    pub fn authorization(&self) -> &HeaderValue {
        &self.authorization
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    pub fn claim_str(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(Value::as_str)
    }

    pub fn fingerprint(&self) -> String {
        token_fingerprint(&self.token)
    }
}

impl fmt::Debug for IncomingCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Do not print the token
        f.debug_struct("IncomingCredential")
            .field("identity", &self.identity)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// Short SHA-256 fingerprint used to correlate a token in logs.
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::auth::claims::project;

    #[test]
    fn debug_output_hides_the_token() {
        let cred = IncomingCredential::new(
            HeaderValue::from_static("Bearer secret-token"),
            "secret-token".into(),
            project(&Map::new()),
            Map::new(),
        );

        let printed = format!("{cred:?}");
        assert!(!printed.contains("secret-token"));
        assert!(printed.contains(&token_fingerprint("secret-token")));
        assert!(cred.authorization().is_sensitive());
    }

    #[test]
    fn fingerprint_is_stable_and_short() {
        assert_eq!(token_fingerprint("abc"), token_fingerprint("abc"));
        assert_ne!(token_fingerprint("abc"), token_fingerprint("abd"));
        assert_eq!(token_fingerprint("abc").len(), 16);
    }
}
