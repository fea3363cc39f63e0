use axum::http::StatusCode;
use thiserror::Error;

use crate::services::auth::ValidationError;
use crate::services::downstream::TransportError;
use crate::services::obo::ExchangeError;

/// Every way a relayed request can fail.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("missing bearer token")]
    MissingCredential,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token audience does not match")]
    WrongAudience,

    #[error("issuer signing keys unavailable")]
    TrustAnchorUnavailable,

    #[error("consent required for {audience}")]
    ConsentRequired {
        audience: String,
        scopes: Vec<String>,
        description: String,
    },

    #[error("token exchange failed: {0}")]
    ExchangeFailed(#[source] ExchangeError),

    #[error(transparent)]
    Transport(TransportError),

    #[error("downstream {target} returned {status}")]
    Upstream {
        target: String,
        status: StatusCode,
        body: serde_json::Value,
    },

    #[error("unknown downstream target: {0}")]
    UnknownTarget(String),

    #[error("unexpected relay failure: {0}")]
    Unexpected(String),
}

impl RelayError {
    /// Client-side auth failures; these never reach a downstream service.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Self::MissingCredential
                | Self::InvalidToken(_)
                | Self::WrongAudience
                | Self::ConsentRequired { .. }
        )
    }
}

impl From<ValidationError> for RelayError {
    fn from(e: ValidationError) -> Self {
        match e {
            ValidationError::InvalidToken(reason) => Self::InvalidToken(reason),
            ValidationError::WrongAudience => Self::WrongAudience,
            ValidationError::KeysUnavailable(_) => Self::TrustAnchorUnavailable,
        }
    }
}

impl From<TransportError> for RelayError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::UnknownTarget(name) => Self::UnknownTarget(name),
            TransportError::InvalidPath { target, path } => {
                Self::Unexpected(format!("invalid path {path} for {target}"))
            }
            other => Self::Transport(other),
        }
    }
}
