use std::collections::HashSet;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};
use thiserror::Error;

use super::jwks::{JwksCache, JwksError};

// Asymmetric algorithms only; shared-secret and `none` tokens are never accepted.
const ACCEPTED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

/// Errors returned by inbound token validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("token audience does not match")]
    WrongAudience,
    #[error("issuer signing keys unavailable")]
    KeysUnavailable(#[source] JwksError),
}

impl From<jsonwebtoken::errors::Error> for ValidationError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::InvalidAudience => Self::WrongAudience,
            ErrorKind::MissingRequiredClaim(claim) if claim == "aud" => Self::WrongAudience,
            _ => Self::InvalidToken(e.to_string()),
        }
    }
}

/// Signing keys of the trusted issuer.
pub enum SigningKeys {
    Static {
        key: DecodingKey,
        algorithm: Algorithm,
    },
    Remote(JwksCache),
}

impl SigningKeys {
    /// Pin a single PEM public key (Ed25519 or RSA).
    pub fn from_pem(pem: &str, algorithm: Algorithm) -> Result<Self, String> {
        let key = match algorithm {
            Algorithm::EdDSA => DecodingKey::from_ed_pem(pem.as_bytes()),
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => {
                DecodingKey::from_rsa_pem(pem.as_bytes())
            }
            other => return Err(format!("unsupported pinned key algorithm {other:?}")),
        }
        .map_err(|e| format!("invalid public key pem: {}", e))?;

        Ok(Self::Static { key, algorithm })
    }
}

/// Inbound bearer-token verifier.
///
/// Checks signature, `exp`/`nbf`, issuer and audience. Stateless apart from
/// the JWKS key cache, so one instance is shared by all requests.
pub struct TokenValidator {
    keys: SigningKeys,
    issuers: Vec<String>,
    audiences: Vec<String>,
    leeway_seconds: u64,
}

impl std::fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Do not print key material
        f.debug_struct("TokenValidator")
            .field("issuers", &self.issuers)
            .field("audiences", &self.audiences)
            .field("leeway_seconds", &self.leeway_seconds)
            .finish()
    }
}

impl TokenValidator {
    pub fn new(
        keys: SigningKeys,
        issuers: Vec<String>,
        audiences: Vec<String>,
        leeway_seconds: u64,
    ) -> Self {
        Self {
            keys,
            issuers,
            audiences,
            leeway_seconds,
        }
    }

    /// Verify a JWT and return its claim set.
    pub async fn validate(&self, token: &str) -> Result<Map<String, Value>, ValidationError> {
        let header = jsonwebtoken::decode_header(token)?;

        if !ACCEPTED_ALGORITHMS.contains(&header.alg) {
            return Err(ValidationError::InvalidToken(format!(
                "algorithm {:?} not accepted",
                header.alg
            )));
        }

        let key = match &self.keys {
            SigningKeys::Static { key, algorithm } => {
                if header.alg != *algorithm {
                    return Err(ValidationError::InvalidToken(format!(
                        "algorithm {:?} does not match pinned key",
                        header.alg
                    )));
                }
                key.clone()
            }
            SigningKeys::Remote(jwks) => match jwks.get_key(header.kid.as_deref()).await {
                Ok(key) => key,
                Err(e) if e.is_unavailable() => return Err(ValidationError::KeysUnavailable(e)),
                Err(e) => return Err(ValidationError::InvalidToken(e.to_string())),
            },
        };

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&self.issuers);
        validation.set_audience(&self.audiences);
        validation.leeway = self.leeway_seconds;
        validation.validate_nbf = true;
        validation.required_spec_claims =
            HashSet::from(["exp".to_string(), "iss".to_string(), "aud".to_string()]);

        let data = jsonwebtoken::decode::<Map<String, Value>>(token, &key, &validation)?;
        Ok(data.claims)
    }
}
