use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::cache::{CacheKey, CachedToken, ExchangeCache};
use super::exchange_client::{ExchangeError, ExchangeRequest, TokenExchanger};
use crate::services::auth::IncomingCredential;

// Upper bound on how long an exchanged token is kept, whatever `expires_in` says.
const MAX_CACHED_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// On-Behalf-Of token acquisition with a per-(subject, audience, scopes) cache.
///
/// - cache hit with an unexpired entry → no exchange call
/// - `ConsentRequired` is returned as-is (needs interactive consent)
/// - any other failure is retried once after `retry_backoff`
pub struct OboExchanger {
    exchanger: Arc<dyn TokenExchanger>,
    cache: Arc<dyn ExchangeCache>,
    retry_backoff: Duration,
    expiry_skew: Duration,
}

impl std::fmt::Debug for OboExchanger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OboExchanger")
            .field("cache", &self.cache.backend_name())
            .field("retry_backoff", &self.retry_backoff)
            .field("expiry_skew", &self.expiry_skew)
            .finish()
    }
}

impl OboExchanger {
    pub fn new(
        exchanger: Arc<dyn TokenExchanger>,
        cache: Arc<dyn ExchangeCache>,
        retry_backoff: Duration,
        expiry_skew: Duration,
    ) -> Self {
        Self {
            exchanger,
            cache,
            retry_backoff,
            expiry_skew,
        }
    }

    /// Get a token for `audience`/`scopes` on behalf of the credential's subject.
    pub async fn acquire(
        &self,
        credential: &IncomingCredential,
        audience: &str,
        scopes: &[String],
    ) -> Result<String, ExchangeError> {
        let key = cache_key(credential, audience, scopes);

        if let Some(key) = &key {
            if let Some(cached) = self.cache.get(key).await {
                debug!(
                    subject = %key.subject(),
                    audience = %audience,
                    "exchange cache hit"
                );
                return Ok(cached.access_token);
            }
        }

        let request = ExchangeRequest {
            assertion: credential.token().to_string(),
            audience: audience.to_string(),
            scopes: scopes.to_vec(),
        };

        let exchanged = match self.exchanger.exchange(&request).await {
            Ok(token) => token,
            Err(err) if err.is_consent_required() => return Err(err),
            Err(err) => {
                warn!(
                    user = %credential.identity().display_name,
                    user_id = %credential.identity().subject_id,
                    audience = %audience,
                    error = %err,
                    backoff_ms = self.retry_backoff.as_millis() as u64,
                    "token exchange failed, retrying once"
                );
                tokio::time::sleep(self.retry_backoff).await;
                self.exchanger.exchange(&request).await?
            }
        };

        let lifetime = Duration::from_secs(exchanged.expires_in)
            .min(MAX_CACHED_LIFETIME)
            .saturating_sub(self.expiry_skew);
        let expires_at = Some(lifetime)
            .filter(|l| !l.is_zero())
            .and_then(|l| Instant::now().checked_add(l));

        match (key, expires_at) {
            (Some(key), Some(expires_at)) => {
                info!(
                    subject = %key.subject(),
                    audience = %audience,
                    ttl_secs = lifetime.as_secs(),
                    "token exchanged"
                );
                self.cache
                    .insert(
                        key,
                        CachedToken {
                            access_token: exchanged.access_token.clone(),
                            expires_at,
                        },
                    )
                    .await;
            }
            _ => {
                debug!(audience = %audience, "token exchanged, not cached");
            }
        }

        Ok(exchanged.access_token)
    }
}

/// Cache key for the credential's subject, or `None` when the caller cannot be
/// told apart from other callers (then the cache is bypassed).
fn cache_key(credential: &IncomingCredential, audience: &str, scopes: &[String]) -> Option<CacheKey> {
    let identity = credential.identity();
    let subject = if identity.has_known_subject() {
        identity.subject_id.clone()
    } else {
        match (credential.claim_str("iss"), credential.claim_str("sub")) {
            (Some(iss), Some(sub)) if !sub.trim().is_empty() => format!("{iss}#{sub}"),
            _ => return None,
        }
    };
    Some(CacheKey::new(subject, audience, scopes))
}
