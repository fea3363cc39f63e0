/// Factory: build the inbound `TokenValidator` from application `Config`.
use std::sync::Arc;

use crate::config::{Config, ConfigError, TrustAnchor};
use crate::services::auth::{JwksCache, SigningKeys, TokenValidator};

pub async fn build_token_validator(config: &Config) -> Result<Arc<TokenValidator>, ConfigError> {
    let keys = match &config.trust_anchor {
        TrustAnchor::Jwks { url, refresh } => {
            let jwks = JwksCache::new(url.clone(), *refresh)
                .map_err(|_| ConfigError::Invalid("AUTH_JWKS_URL".into()))?;

            // 起動時に一度取りに行く。失敗しても最初のリクエストで再取得する
            if let Err(err) = jwks.refresh().await {
                tracing::warn!(error = %err, url = %url, "initial jwks fetch failed");
            }
            SigningKeys::Remote(jwks)
        }
        TrustAnchor::StaticPem { pem, algorithm } => {
            SigningKeys::from_pem(pem, *algorithm).map_err(|reason| {
                tracing::error!(%reason, "pinned access token key rejected");
                ConfigError::Invalid("ACCESS_JWT_PUBLIC_KEY_PEM".into())
            })?
        }
    };

    Ok(Arc::new(TokenValidator::new(
        keys,
        config.auth_issuers.clone(),
        config.auth_audiences.clone(),
        config.access_token_leeway_seconds,
    )))
}
