use crate::services::auth::IncomingCredential;
use crate::services::downstream::{DownstreamPool, DownstreamTarget, RawResponse, RelayMode};

use super::error::RelayError;

/// Same-audience relay: the inbound `Authorization` header goes out untouched.
///
/// The token is never re-encoded, so its signature stays valid at the next hop.
#[derive(Debug, Clone)]
pub struct ForwardingRelay {
    pool: DownstreamPool,
}

impl ForwardingRelay {
    pub fn new(pool: DownstreamPool) -> Self {
        Self { pool }
    }

    pub async fn forward(
        &self,
        credential: &IncomingCredential,
        target: &DownstreamTarget,
        path: &str,
    ) -> Result<RawResponse, RelayError> {
        if target.mode != RelayMode::Forward {
            return Err(RelayError::Unexpected(format!(
                "target {} is not a same-audience target",
                target.name
            )));
        }

        let response = self
            .pool
            .send(&target.name, path, credential.authorization().clone())
            .await?;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::HeaderValue;
    use serde_json::Map;
    use url::Url;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::services::auth::claims::project;

    fn target(base: &str, mode: RelayMode) -> DownstreamTarget {
        DownstreamTarget {
            name: "protected".into(),
            base_url: Url::parse(base).unwrap(),
            audience: "api://relay".into(),
            scopes: vec![],
            mode,
            path: "/api/data".into(),
        }
    }

    fn credential(header: &'static str) -> IncomingCredential {
        let token = header.split_once(' ').unwrap().1.to_string();
        IncomingCredential::new(
            HeaderValue::from_static(header),
            token,
            project(&Map::new()),
            Map::new(),
        )
    }

    #[tokio::test]
    async fn outbound_authorization_is_byte_identical() {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let target = target(&server.uri(), RelayMode::Forward);
        let pool = DownstreamPool::new(std::slice::from_ref(&target), Duration::from_secs(5)).unwrap();
        let relay = ForwardingRelay::new(pool);

        let inbound = "bearer eyJhbGciOiJFZERTQSJ9.eyJzdWIiOiJ4In0.c2ln";
        relay
            .forward(&credential(inbound), &target, "/api/data")
            .await
            .unwrap();

        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 1);
        let outbound = received[0].headers.get("authorization").unwrap();
        assert_eq!(outbound.as_bytes(), inbound.as_bytes());
    }

    #[tokio::test]
    async fn obo_targets_are_refused() {
        let target = target("http://127.0.0.1:9", RelayMode::OnBehalfOf);
        let pool = DownstreamPool::new(std::slice::from_ref(&target), Duration::from_secs(1)).unwrap();
        let relay = ForwardingRelay::new(pool);

        let err = relay
            .forward(&credential("Bearer t"), &target, "/api/data")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Unexpected(_)));
    }
}
