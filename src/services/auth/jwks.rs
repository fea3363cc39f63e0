//! JWKS (issuer signing keys) fetching and caching.
//!
//! Keys are refetched when the cached set is older than `max_age`, or when a
//! token names a `kid` we have not seen (key rotation). Unknown-kid refetches
//! are throttled so a flood of forged kids cannot hammer the issuer.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::{JwkSet, PublicKeyUse};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

const MIN_REFETCH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum JwksError {
    #[error("failed to fetch JWK set")]
    Fetch(#[from] reqwest::Error),
    #[error("JWK set endpoint returned {0}")]
    Status(reqwest::StatusCode),
    #[error("no signing key for kid {0:?}")]
    UnknownKey(Option<String>),
    #[error("JWK set endpoint failed recently, not retrying yet")]
    Backoff,
    #[error("jwks cache lock poisoned")]
    Poisoned,
}

impl JwksError {
    /// True when the issuer could not be reached, as opposed to the token
    /// naming a key the issuer does not publish.
    pub fn is_unavailable(&self) -> bool {
        !matches!(self, Self::UnknownKey(_))
    }
}

#[derive(Default)]
struct KeyState {
    keys: HashMap<String, DecodingKey>,
    // Keys published without a kid; usable only when the token has none either.
    anonymous: Vec<DecodingKey>,
    fetched_at: Option<Instant>,
    // Last fetch attempt, successful or not. Throttles every refetch.
    attempted_at: Option<Instant>,
}

pub struct JwksCache {
    url: Url,
    http: reqwest::Client,
    max_age: Duration,
    state: RwLock<KeyState>,
}

impl std::fmt::Debug for JwksCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksCache")
            .field("url", &self.url.as_str())
            .field("max_age", &self.max_age)
            .finish()
    }
}

impl JwksCache {
    pub fn new(url: Url, max_age: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            url,
            http,
            max_age,
            state: RwLock::new(KeyState::default()),
        })
    }

    /// Find the decoding key for a token header `kid`.
    pub async fn get_key(&self, kid: Option<&str>) -> Result<DecodingKey, JwksError> {
        let (stale, last_fetch) = {
            let state = self.state.read().map_err(|_| JwksError::Poisoned)?;
            let stale = state
                .fetched_at
                .is_none_or(|at| at.elapsed() >= self.max_age);
            (stale, state.fetched_at)
        };

        if stale && self.may_refetch()? {
            if let Err(e) = self.refresh().await {
                // Keep serving the previous key set if we have one.
                if last_fetch.is_none() {
                    return Err(e);
                }
                warn!(error = %e, url = %self.url, "JWKS refresh failed, using cached keys");
            }
        } else if last_fetch.is_none() {
            // The last attempt failed moments ago and there is nothing cached.
            return Err(JwksError::Backoff);
        }

        if let Some(key) = self.lookup(kid)? {
            return Ok(key);
        }

        if self.may_refetch()? {
            debug!(kid = ?kid, "kid not in cached JWKS, refetching");
            self.refresh().await?;
            if let Some(key) = self.lookup(kid)? {
                return Ok(key);
            }
        }

        Err(JwksError::UnknownKey(kid.map(str::to_string)))
    }

    fn may_refetch(&self) -> Result<bool, JwksError> {
        let state = self.state.read().map_err(|_| JwksError::Poisoned)?;
        Ok(state
            .attempted_at
            .is_none_or(|at| at.elapsed() >= MIN_REFETCH_INTERVAL))
    }

    fn lookup(&self, kid: Option<&str>) -> Result<Option<DecodingKey>, JwksError> {
        let state = self.state.read().map_err(|_| JwksError::Poisoned)?;
        let key = match kid {
            Some(kid) => state.keys.get(kid).cloned(),
            // Without a kid we only accept an unambiguous key set.
            None => match (state.keys.len(), state.anonymous.len()) {
                (0, 1) => state.anonymous.first().cloned(),
                (1, 0) => state.keys.values().next().cloned(),
                _ => None,
            },
        };
        Ok(key)
    }

    /// Fetch the key set and replace the cached one.
    pub async fn refresh(&self) -> Result<(), JwksError> {
        debug!(url = %self.url, "fetching JWKS");
        {
            let mut state = self.state.write().map_err(|_| JwksError::Poisoned)?;
            state.attempted_at = Some(Instant::now());
        }

        let response = self.http.get(self.url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(JwksError::Status(response.status()));
        }
        let set: JwkSet = response.json().await?;

        let now = Instant::now();
        let mut next = KeyState {
            fetched_at: Some(now),
            attempted_at: Some(now),
            ..KeyState::default()
        };
        for jwk in &set.keys {
            if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
                continue;
            }
            let key = match DecodingKey::from_jwk(jwk) {
                Ok(key) => key,
                Err(e) => {
                    warn!(kid = ?jwk.common.key_id, error = %e, "skipping unusable JWK");
                    continue;
                }
            };
            match &jwk.common.key_id {
                Some(kid) => {
                    next.keys.insert(kid.clone(), key);
                }
                None => next.anonymous.push(key),
            }
        }

        info!(
            url = %self.url,
            keys = next.keys.len() + next.anonymous.len(),
            "JWKS refreshed"
        );

        let mut state = self.state.write().map_err(|_| JwksError::Poisoned)?;
        *state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::test_support;

    async fn jwks_server(expected_fetches: u64) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/discovery/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(test_support::jwks_json()))
            .expect(expected_fetches)
            .mount(&server)
            .await;
        server
    }

    fn cache_for(server: &MockServer, max_age: Duration) -> JwksCache {
        let url = Url::parse(&format!("{}/discovery/keys", server.uri())).unwrap();
        JwksCache::new(url, max_age).unwrap()
    }

    #[tokio::test]
    async fn known_kid_is_served_from_cache() {
        let server = jwks_server(1).await;
        let cache = cache_for(&server, Duration::from_secs(300));

        cache.get_key(Some(test_support::KID)).await.unwrap();
        cache.get_key(Some(test_support::KID)).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_kid_is_rejected_after_one_refetch_window() {
        let server = jwks_server(1).await;
        let cache = cache_for(&server, Duration::from_secs(300));

        // First call fetches; the immediate unknown-kid refetch is throttled.
        let err = cache.get_key(Some("rotated-away")).await.unwrap_err();
        assert!(matches!(err, JwksError::UnknownKey(Some(ref k)) if k == "rotated-away"));
        assert!(!err.is_unavailable());
    }

    #[tokio::test]
    async fn failing_endpoint_is_not_hammered_during_an_outage() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;
        let cache = cache_for(&server, Duration::ZERO);

        for _ in 0..5 {
            let err = cache.get_key(Some(test_support::KID)).await.unwrap_err();
            assert!(err.is_unavailable());
        }
    }

    #[tokio::test]
    async fn stale_keys_keep_serving_without_refetch_storm() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(test_support::jwks_json()))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let cache = cache_for(&server, Duration::ZERO);

        for _ in 0..5 {
            cache.get_key(Some(test_support::KID)).await.unwrap();
        }
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_endpoint_is_reported_as_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let cache = cache_for(&server, Duration::from_secs(300));

        let err = cache.get_key(Some(test_support::KID)).await.unwrap_err();
        assert!(err.is_unavailable());
    }
}
