/*
 * Responsibility
 * - 環境変数や設定の読み込み (issuer / audience, downstream targets, OBO client 設定など)
 * - 設定値のバリデーション (不足なら起動失敗)
 * - service discovery は使わない: downstream の base address は起動時に確定させる
 */
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use url::Url;

use crate::services::downstream::{DownstreamTarget, RelayMode};
use crate::services::obo::{ClientCredential, ExchangeGrant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    fn parse(raw: Option<String>) -> Self {
        match raw
            .unwrap_or_else(|| "development".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    Missing(String),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing configuration: {}", key),
            ConfigError::Invalid(key) => write!(f, "invalid configuration: {}", key),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Where the signing keys for inbound tokens come from.
#[derive(Debug, Clone)]
pub enum TrustAnchor {
    /// Issuer-published JWK set, refreshed periodically.
    Jwks { url: Url, refresh: Duration },
    /// A single public key pinned in configuration.
    StaticPem { pem: String, algorithm: Algorithm },
}

#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub token_endpoint: Url,
    pub client_id: String,
    pub credential: ClientCredential,
    pub grant: ExchangeGrant,
    pub retry_backoff: Duration,
    pub expiry_skew: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub app_env: AppEnv,
    pub cors_allowed_origins: Vec<String>,
    pub public_api_url: String,

    pub auth_issuers: Vec<String>,
    pub auth_audiences: Vec<String>,
    pub access_token_leeway_seconds: u64,
    pub trust_anchor: TrustAnchor,

    pub downstream_targets: Vec<DownstreamTarget>,
    pub downstream_timeout: Duration,

    // None when no target uses the OBO path.
    pub exchange: Option<ExchangeConfig>,

    pub expose_claims: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup (process env in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &str| get(key).ok_or_else(|| ConfigError::Missing(key.to_string()));

        let port: u16 = match get("PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid("PORT".into()))?,
            None => 3000,
        };
        let addr: SocketAddr = SocketAddr::from_str(&format!("0.0.0.0:{}", port))
            .map_err(|_| ConfigError::Invalid("PORT".into()))?;

        let app_env = AppEnv::parse(get("APP_ENV"));
        let cors_allowed_origins = split_list(get("CORS_ALLOWED_ORIGINS").unwrap_or_default());
        let public_api_url = get("PUBLIC_API_URL").unwrap_or_default();

        let auth_issuers = split_list(require("AUTH_ISSUER")?);
        let auth_audiences = split_list(require("AUTH_AUDIENCE")?);
        if auth_issuers.is_empty() {
            return Err(ConfigError::Invalid("AUTH_ISSUER".into()));
        }
        if auth_audiences.is_empty() {
            return Err(ConfigError::Invalid("AUTH_AUDIENCE".into()));
        }

        let access_token_leeway_seconds = parse_or(get("ACCESS_TOKEN_LEEWAY_SECONDS"), 60)
            .map_err(|_| ConfigError::Invalid("ACCESS_TOKEN_LEEWAY_SECONDS".into()))?;

        let trust_anchor = match (get("AUTH_JWKS_URL"), get("ACCESS_JWT_PUBLIC_KEY_PEM")) {
            (Some(url), _) => TrustAnchor::Jwks {
                url: parse_url("AUTH_JWKS_URL", &url)?,
                refresh: Duration::from_secs(
                    parse_or(get("JWKS_REFRESH_SECONDS"), 300)
                        .map_err(|_| ConfigError::Invalid("JWKS_REFRESH_SECONDS".into()))?,
                ),
            },
            (None, Some(pem)) => TrustAnchor::StaticPem {
                pem: pem.replace("\\n", "\n"),
                algorithm: parse_algorithm(get("ACCESS_JWT_ALGORITHM"))?,
            },
            (None, None) => return Err(ConfigError::Missing("AUTH_JWKS_URL".into())),
        };

        let downstream_timeout = Duration::from_secs(
            parse_or(get("DOWNSTREAM_TIMEOUT_SECONDS"), 10)
                .map_err(|_| ConfigError::Invalid("DOWNSTREAM_TIMEOUT_SECONDS".into()))?,
        );

        let names = split_list(require("DOWNSTREAM_TARGETS")?);
        if names.is_empty() {
            return Err(ConfigError::Invalid("DOWNSTREAM_TARGETS".into()));
        }
        let mut downstream_targets = Vec::with_capacity(names.len());
        for name in names {
            let target = parse_target(&name, &get, &auth_audiences[0])?;
            if downstream_targets
                .iter()
                .any(|t: &DownstreamTarget| t.name == target.name)
            {
                return Err(ConfigError::Invalid("DOWNSTREAM_TARGETS".into()));
            }
            downstream_targets.push(target);
        }

        let needs_exchange = downstream_targets
            .iter()
            .any(|t| t.mode == RelayMode::OnBehalfOf);
        let exchange = if needs_exchange {
            Some(parse_exchange(&get)?)
        } else {
            None
        };

        let expose_claims = matches!(
            get("RELAY_EXPOSE_CLAIMS")
                .unwrap_or_default()
                .to_ascii_lowercase()
                .as_str(),
            "1" | "true" | "yes"
        );

        Ok(Self {
            addr,
            app_env,
            cors_allowed_origins,
            public_api_url,
            auth_issuers,
            auth_audiences,
            access_token_leeway_seconds,
            trust_anchor,
            downstream_targets,
            downstream_timeout,
            exchange,
            expose_claims,
        })
    }
}

fn parse_target<G>(name: &str, get: &G, default_audience: &str) -> Result<DownstreamTarget, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let prefix = format!(
        "DOWNSTREAM_{}",
        name.to_ascii_uppercase().replace(['-', '.'], "_")
    );
    let key = |suffix: &str| format!("{prefix}_{suffix}");

    let base_key = key("BASE_URL");
    let base_url = get(&base_key).ok_or_else(|| ConfigError::Missing(base_key.clone()))?;
    let base_url = parse_url(&base_key, &base_url)?;

    let mode_key = key("MODE");
    let mode = match get(&mode_key) {
        Some(raw) => raw
            .parse::<RelayMode>()
            .map_err(|_| ConfigError::Invalid(mode_key.clone()))?,
        None => RelayMode::Forward,
    };

    let path = get(&key("PATH")).unwrap_or_else(|| "/api/data".to_string());
    let scopes = get(&key("SCOPES"))
        .map(|raw| split_scopes(&raw))
        .unwrap_or_default();

    let audience_key = key("AUDIENCE");
    let audience = match (get(&audience_key), mode) {
        (Some(aud), _) => aud,
        (None, RelayMode::Forward) => default_audience.to_string(),
        (None, RelayMode::OnBehalfOf) => return Err(ConfigError::Missing(audience_key)),
    };

    if mode == RelayMode::OnBehalfOf && scopes.is_empty() {
        return Err(ConfigError::Missing(key("SCOPES")));
    }

    Ok(DownstreamTarget {
        name: name.to_string(),
        base_url,
        audience,
        scopes,
        mode,
        path,
    })
}

fn parse_exchange<G>(get: &G) -> Result<ExchangeConfig, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let endpoint = get("OBO_TOKEN_ENDPOINT")
        .ok_or_else(|| ConfigError::Missing("OBO_TOKEN_ENDPOINT".into()))?;
    let token_endpoint = parse_url("OBO_TOKEN_ENDPOINT", &endpoint)?;
    let client_id =
        get("OBO_CLIENT_ID").ok_or_else(|| ConfigError::Missing("OBO_CLIENT_ID".into()))?;

    let credential = match (get("OBO_CLIENT_SECRET"), get("OBO_CLIENT_ASSERTION_FILE")) {
        (Some(secret), _) => ClientCredential::Secret(secret),
        (None, Some(path)) => ClientCredential::AssertionFile(PathBuf::from(path)),
        (None, None) => return Err(ConfigError::Missing("OBO_CLIENT_SECRET".into())),
    };

    let grant = match get("OBO_GRANT") {
        Some(raw) => raw
            .parse::<ExchangeGrant>()
            .map_err(|_| ConfigError::Invalid("OBO_GRANT".into()))?,
        None => ExchangeGrant::JwtBearer,
    };

    let retry_backoff = Duration::from_millis(
        parse_or(get("OBO_RETRY_BACKOFF_MS"), 250)
            .map_err(|_| ConfigError::Invalid("OBO_RETRY_BACKOFF_MS".into()))?,
    );
    let expiry_skew = Duration::from_secs(
        parse_or(get("OBO_EXPIRY_SKEW_SECONDS"), 60)
            .map_err(|_| ConfigError::Invalid("OBO_EXPIRY_SKEW_SECONDS".into()))?,
    );

    Ok(ExchangeConfig {
        token_endpoint,
        client_id,
        credential,
        grant,
        retry_backoff,
        expiry_skew,
    })
}

fn parse_algorithm(raw: Option<String>) -> Result<Algorithm, ConfigError> {
    match raw.as_deref().map(str::trim) {
        None => Ok(Algorithm::EdDSA),
        Some(name) => match Algorithm::from_str(name) {
            Ok(alg @ (Algorithm::EdDSA | Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512)) => {
                Ok(alg)
            }
            _ => Err(ConfigError::Invalid("ACCESS_JWT_ALGORITHM".into())),
        },
    }
}

fn parse_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw.trim()).map_err(|_| ConfigError::Invalid(key.to_string()))
}

fn parse_or(raw: Option<String>, default: u64) -> Result<u64, std::num::ParseIntError> {
    match raw {
        Some(v) => v.trim().parse::<u64>(),
        None => Ok(default),
    }
}

fn split_list(raw: String) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// Scopes are usually space separated, but accept commas as well.
fn split_scopes(raw: &str) -> Vec<String> {
    raw.split([' ', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
