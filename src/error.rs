/*
 * Responsibility
 * - アプリ共通の AppError 定義 (HTTP に出す唯一のエラー型)
 * - IntoResponse 実装 (HTTP status / JSON error envelope `{statusCode, title, detail}`)
 * - RelayError を status class に変換 (401 / 404 / 502 / 504 / downstream status / 500)
 */
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::services::downstream::TransportError;
use crate::services::obo::ExchangeError;
use crate::services::relay::RelayError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub status_code: u16,
    pub title: &'static str,
    pub detail: String,
    // downstream が返した body (UpstreamError のときだけ)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_response: Option<serde_json::Value>,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("unauthorized: {detail}")]
    Unauthorized { detail: String, invalid_token: bool },
    #[error("consent required: {detail}")]
    ConsentRequired { detail: String, scopes: Vec<String> },
    #[error("not found: {resource}")]
    NotFound { resource: String },
    #[error("bad gateway: {detail}")]
    BadGateway { detail: String },
    #[error("gateway timeout: {detail}")]
    GatewayTimeout { detail: String },
    #[error("downstream {target} returned {status}")]
    Upstream {
        target: String,
        status: StatusCode,
        body: serde_json::Value,
    },
    #[error("internal server error")]
    Internal,
}

impl AppError {
    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::Unauthorized {
            detail: detail.into(),
            invalid_token: false,
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized { .. } | AppError::ConsentRequired { .. } => {
                StatusCode::UNAUTHORIZED
            }
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::BadGateway { .. } => StatusCode::BAD_GATEWAY,
            AppError::GatewayTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            AppError::Upstream { status, .. } => *status,
            AppError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn www_authenticate(&self) -> Option<HeaderValue> {
        match self {
            AppError::Unauthorized {
                invalid_token: true,
                ..
            } => Some(HeaderValue::from_static(r#"Bearer error="invalid_token""#)),
            AppError::Unauthorized { .. } => Some(HeaderValue::from_static("Bearer")),
            AppError::ConsentRequired { scopes, .. } => {
                HeaderValue::from_str(&format!(
                    r#"Bearer error="insufficient_scope", scope="{}""#,
                    scopes.join(" ")
                ))
                .ok()
                .or(Some(HeaderValue::from_static("Bearer")))
            }
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let www_authenticate = self.www_authenticate();

        let (detail, backend_response) = match self {
            AppError::Unauthorized { detail, .. }
            | AppError::ConsentRequired { detail, .. }
            | AppError::BadGateway { detail }
            | AppError::GatewayTimeout { detail } => (detail, None),
            AppError::NotFound { resource } => (format!("{resource} not found."), None),
            AppError::Upstream {
                target,
                status,
                body,
            } => (
                format!("Downstream service '{target}' responded with {}.", status.as_u16()),
                Some(body),
            ),
            // 内部事情は出さない
            AppError::Internal => ("An unexpected error occurred.".to_string(), None),
        };

        let body = ErrorResponse {
            status_code: status.as_u16(),
            title: status.canonical_reason().unwrap_or("Error"),
            detail,
            backend_response,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(value) = www_authenticate {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, value);
        }
        response
    }
}

impl From<RelayError> for AppError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::MissingCredential => {
                AppError::unauthorized("A bearer token is required.")
            }
            RelayError::InvalidToken(_) => AppError::Unauthorized {
                detail: "The access token is invalid or expired.".into(),
                invalid_token: true,
            },
            RelayError::WrongAudience => AppError::Unauthorized {
                detail: "The access token was not issued for this API.".into(),
                invalid_token: true,
            },
            RelayError::TrustAnchorUnavailable => AppError::BadGateway {
                detail: "The token issuer's signing keys could not be retrieved.".into(),
            },
            RelayError::ConsentRequired {
                audience, scopes, ..
            } => AppError::ConsentRequired {
                detail: format!(
                    "User consent is required before calling {audience}. \
                     Sign in again and grant access to: {}.",
                    scopes.join(" ")
                ),
                scopes,
            },
            RelayError::ExchangeFailed(err) => match err {
                ExchangeError::Rejected { .. } | ExchangeError::ConsentRequired { .. } => {
                    AppError::unauthorized("The token exchange was rejected by the issuer.")
                }
                ExchangeError::Unavailable(_) => AppError::BadGateway {
                    detail: "The token exchange endpoint is unavailable.".into(),
                },
            },
            RelayError::Transport(err) => match err {
                TransportError::Timeout { target } => AppError::GatewayTimeout {
                    detail: format!("Downstream service '{target}' did not respond in time."),
                },
                TransportError::Unreachable { target, .. } => AppError::BadGateway {
                    detail: format!("Downstream service '{target}' is unreachable."),
                },
                TransportError::UnknownTarget(name) => {
                    AppError::not_found(format!("Downstream target '{name}'"))
                }
                TransportError::InvalidPath { .. } => AppError::Internal,
            },
            RelayError::Upstream {
                target,
                status,
                body,
            } => AppError::Upstream {
                target,
                status,
                body,
            },
            RelayError::UnknownTarget(name) => {
                AppError::not_found(format!("Downstream target '{name}'"))
            }
            RelayError::Unexpected(_) => AppError::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;
    use serde_json::{Value, json};

    use super::*;

    async fn render(err: AppError) -> (StatusCode, Option<String>, Value) {
        let response = err.into_response();
        let status = response.status();
        let challenge = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, challenge, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn missing_token_is_401_with_bearer_challenge() {
        let (status, challenge, body) = render(RelayError::MissingCredential.into()).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(challenge.as_deref(), Some("Bearer"));
        assert_eq!(body["statusCode"], 401);
        assert_eq!(body["title"], "Unauthorized");
        assert!(body.get("backendResponse").is_none());
    }

    #[tokio::test]
    async fn invalid_token_does_not_leak_the_reason() {
        let err: AppError = RelayError::InvalidToken("InvalidSignature".into()).into();
        let (status, challenge, body) = render(err).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(challenge.as_deref(), Some(r#"Bearer error="invalid_token""#));
        assert!(!body["detail"].as_str().unwrap().contains("Signature"));
    }

    #[tokio::test]
    async fn consent_required_names_the_scopes() {
        let err: AppError = RelayError::ConsentRequired {
            audience: "api://backend".into(),
            scopes: vec!["api://backend/.default".into()],
            description: "AADSTS65001".into(),
        }
        .into();
        let (status, challenge, body) = render(err).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(challenge.unwrap().contains("insufficient_scope"));
        let detail = body["detail"].as_str().unwrap();
        assert!(detail.contains("consent"));
        assert!(detail.contains("api://backend/.default"));
        assert!(!detail.contains("AADSTS"));
    }

    #[tokio::test]
    async fn upstream_error_keeps_downstream_status_and_body() {
        let err: AppError = RelayError::Upstream {
            target: "protected".into(),
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: json!({"reason": "maintenance"}),
        }
        .into();
        let (status, challenge, body) = render(err).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(challenge.is_none());
        assert_eq!(body["statusCode"], 503);
        assert_eq!(body["title"], "Service Unavailable");
        assert_eq!(body["backendResponse"], json!({"reason": "maintenance"}));
    }

    #[tokio::test]
    async fn exchange_failures_split_by_cause() {
        let rejected: AppError = RelayError::ExchangeFailed(ExchangeError::Rejected {
            status: StatusCode::BAD_REQUEST,
            error: "invalid_grant".into(),
            description: None,
        })
        .into();
        assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);

        let unavailable: AppError =
            RelayError::ExchangeFailed(ExchangeError::Unavailable("503".into())).into();
        assert_eq!(unavailable.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn transport_and_unexpected_errors() {
        let timeout: AppError = RelayError::Transport(TransportError::Timeout {
            target: "protected".into(),
        })
        .into();
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);

        let (status, _, body) = render(RelayError::Unexpected("boom at line 3".into()).into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body["detail"].as_str().unwrap().contains("boom"));

        let (status, _, _) = render(RelayError::UnknownTarget("nope".into()).into()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
