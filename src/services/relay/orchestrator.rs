//! Per-request relay state machine.
//!
//! Received → Validated → (Forward | OnBehalfOf) → downstream → Completed,
//! with any failure ending in Rejected. The only automatic retry is the single
//! exchange retry inside [`OboExchanger`]; downstream failures are authoritative.

use std::sync::Arc;

use axum::http::{HeaderValue, StatusCode};
use tracing::{info, warn};

use super::error::RelayError;
use super::forward::ForwardingRelay;
use crate::services::auth::claims::{self, Identity};
use crate::services::auth::{IncomingCredential, TokenValidator, token_fingerprint};
use crate::services::downstream::{DownstreamPool, DownstreamTarget, RawResponse, RelayMode};
use crate::services::obo::{ExchangeError, OboExchanger};

/// A completed relay: the downstream reply plus who asked for it.
#[derive(Debug, Clone)]
pub struct RelayOutcome {
    pub identity: Identity,
    pub target: Arc<DownstreamTarget>,
    pub status: StatusCode,
    pub body: serde_json::Value,
}

impl RelayOutcome {
    pub fn mode(&self) -> RelayMode {
        self.target.mode
    }
}

#[derive(Debug)]
pub struct RelayOrchestrator {
    validator: Arc<TokenValidator>,
    pool: DownstreamPool,
    forwarder: ForwardingRelay,
    // None when no target is configured for the OBO path.
    obo: Option<OboExchanger>,
}

impl RelayOrchestrator {
    pub fn new(validator: Arc<TokenValidator>, pool: DownstreamPool, obo: Option<OboExchanger>) -> Self {
        Self {
            validator,
            forwarder: ForwardingRelay::new(pool.clone()),
            pool,
            obo,
        }
    }

    /// Received → Validated: check the bearer token and project the caller's identity.
    pub async fn authenticate(
        &self,
        authorization: Option<&HeaderValue>,
    ) -> Result<IncomingCredential, RelayError> {
        let header = authorization.ok_or(RelayError::MissingCredential)?;
        let token = bearer_token(header).ok_or(RelayError::MissingCredential)?;

        let claims = match self.validator.validate(token).await {
            Ok(claims) => claims,
            Err(err) => {
                warn!(
                    error = %err,
                    token = %token_fingerprint(token),
                    "access token verification failed"
                );
                return Err(err.into());
            }
        };

        let identity = claims::project(&claims);
        Ok(IncomingCredential::new(
            header.clone(),
            token.to_string(),
            identity,
            claims,
        ))
    }

    /// Validated → Completed | Rejected for the named target.
    pub async fn dispatch(
        &self,
        credential: &IncomingCredential,
        target_name: &str,
    ) -> Result<RelayOutcome, RelayError> {
        let identity = credential.identity();
        let result = self.dispatch_inner(credential, target_name).await;

        match &result {
            Ok(outcome) => info!(
                user = %identity.display_name,
                user_id = %identity.subject_id,
                downstream = %target_name,
                mode = %outcome.mode(),
                status = outcome.status.as_u16(),
                "relay completed"
            ),
            // consent は利用者側の操作待ちなので warn にしない
            Err(err) if err.is_auth_error() => info!(
                user = %identity.display_name,
                user_id = %identity.subject_id,
                downstream = %target_name,
                error = %err,
                "relay rejected"
            ),
            Err(err) => warn!(
                user = %identity.display_name,
                user_id = %identity.subject_id,
                downstream = %target_name,
                token = %credential.fingerprint(),
                error = %err,
                "relay failed"
            ),
        }

        result
    }

    async fn dispatch_inner(
        &self,
        credential: &IncomingCredential,
        target_name: &str,
    ) -> Result<RelayOutcome, RelayError> {
        let target = self
            .pool
            .target(target_name)
            .ok_or_else(|| RelayError::UnknownTarget(target_name.to_string()))?;

        let raw = match target.mode {
            RelayMode::Forward => self.forwarder.forward(credential, &target, &target.path).await?,
            RelayMode::OnBehalfOf => self.exchange_and_send(credential, &target).await?,
        };

        if !raw.is_success() {
            return Err(RelayError::Upstream {
                target: target.name.clone(),
                status: raw.status,
                body: raw.json_or_text(),
            });
        }

        Ok(RelayOutcome {
            identity: credential.identity().clone(),
            status: raw.status,
            body: raw.json_or_text(),
            target,
        })
    }

    async fn exchange_and_send(
        &self,
        credential: &IncomingCredential,
        target: &DownstreamTarget,
    ) -> Result<RawResponse, RelayError> {
        let obo = self
            .obo
            .as_ref()
            .ok_or_else(|| RelayError::Unexpected("token exchange is not configured".into()))?;

        let token = obo
            .acquire(credential, &target.audience, &target.scopes)
            .await
            .map_err(|err| match err {
                ExchangeError::ConsentRequired { description } => RelayError::ConsentRequired {
                    audience: target.audience.clone(),
                    scopes: target.scopes.clone(),
                    description,
                },
                other => RelayError::ExchangeFailed(other),
            })?;

        let authorization = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| RelayError::Unexpected("exchanged token is not a valid header".into()))?;

        let response = self
            .pool
            .send(&target.name, &target.path, authorization)
            .await?;
        Ok(response)
    }
}

/// Extract the token from `Authorization: Bearer <token>`.
fn bearer_token(header: &HeaderValue) -> Option<&str> {
    let value = header.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
