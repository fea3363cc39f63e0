//! One long-lived HTTP client per downstream target.
//!
//! Clients are built once at startup and reused for every request; connection
//! pooling is left to `reqwest`. The pool never retries: a failed call is
//! reported as a [`TransportError`] and the orchestrator decides what to do.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{HeaderValue, StatusCode, header};
use thiserror::Error;

use super::target::DownstreamTarget;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unknown downstream target: {0}")]
    UnknownTarget(String),
    #[error("invalid downstream path for {target}: {path}")]
    InvalidPath { target: String, path: String },
    #[error("downstream {target} timed out")]
    Timeout { target: String },
    #[error("downstream {target} unreachable")]
    Unreachable {
        target: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Status and body of a downstream reply, untouched.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Interpret the body as JSON; non-JSON payloads are kept as text.
    pub fn json_or_text(&self) -> serde_json::Value {
        if self.body.is_empty() {
            return serde_json::Value::Null;
        }
        let text = || serde_json::Value::String(String::from_utf8_lossy(&self.body).into_owned());

        // An explicit non-JSON content type is taken at its word.
        match self.content_type.as_deref() {
            Some(ct) if !ct.contains("json") => text(),
            _ => serde_json::from_slice(&self.body).unwrap_or_else(|_| text()),
        }
    }
}

#[derive(Debug, Clone)]
struct DownstreamClient {
    target: Arc<DownstreamTarget>,
    http: reqwest::Client,
}

#[derive(Debug, Clone)]
pub struct DownstreamPool {
    clients: Arc<HashMap<String, DownstreamClient>>,
}

impl DownstreamPool {
    pub fn new(targets: &[DownstreamTarget], timeout: Duration) -> Result<Self, reqwest::Error> {
        let mut clients = HashMap::with_capacity(targets.len());
        for target in targets {
            let http = reqwest::Client::builder()
                .timeout(timeout)
                .connect_timeout(timeout)
                .build()?;
            clients.insert(
                target.name.clone(),
                DownstreamClient {
                    target: Arc::new(target.clone()),
                    http,
                },
            );
        }

        Ok(Self {
            clients: Arc::new(clients),
        })
    }

    pub fn target(&self, name: &str) -> Option<Arc<DownstreamTarget>> {
        self.clients.get(name).map(|c| c.target.clone())
    }

    /// GET `path` on the named target with the given `Authorization` value.
    pub async fn send(
        &self,
        target_name: &str,
        path: &str,
        authorization: HeaderValue,
    ) -> Result<RawResponse, TransportError> {
        let client = self
            .clients
            .get(target_name)
            .ok_or_else(|| TransportError::UnknownTarget(target_name.to_string()))?;

        let url = client
            .target
            .endpoint(path)
            .map_err(|_| TransportError::InvalidPath {
                target: target_name.to_string(),
                path: path.to_string(),
            })?;

        let mut authorization = authorization;
        authorization.set_sensitive(true);

        tracing::debug!(downstream = %target_name, url = %url, "calling downstream");

        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                TransportError::Timeout {
                    target: target_name.to_string(),
                }
            } else {
                TransportError::Unreachable {
                    target: target_name.to_string(),
                    source: e,
                }
            }
        };

        let response = client
            .http
            .get(url)
            .header(header::AUTHORIZATION, authorization)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(classify)?;

        Ok(RawResponse {
            status,
            content_type,
            body,
        })
    }
}
