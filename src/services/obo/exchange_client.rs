//! Client for the trust anchor's token endpoint.
//!
//! Two grant styles are supported:
//! - `jwt-bearer` with `requested_token_use=on_behalf_of` (Entra ID OBO)
//! - RFC 8693 token exchange
//!
//! Replies are classified into consent-required, rejected (the grant itself
//! was refused) and unavailable (network, 5xx, unreadable reply).

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

pub const GRANT_TYPE_JWT_BEARER: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
pub const GRANT_TYPE_TOKEN_EXCHANGE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
pub const TOKEN_TYPE_ACCESS_TOKEN: &str = "urn:ietf:params:oauth:token-type:access_token";
pub const CLIENT_ASSERTION_TYPE_JWT_BEARER: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

// AADSTS65001: the user or administrator has not consented to use the application.
const CONSENT_ERROR_CODE: u64 = 65001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeGrant {
    JwtBearer,
    TokenExchange,
}

impl FromStr for ExchangeGrant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jwt-bearer" | "obo" => Ok(Self::JwtBearer),
            "token-exchange" | "rfc8693" => Ok(Self::TokenExchange),
            other => Err(format!("unknown exchange grant: {other}")),
        }
    }
}

/// How the relay authenticates itself to the token endpoint.
#[derive(Clone)]
pub enum ClientCredential {
    Secret(String),
    // Federated assertion written to disk by the platform (workload / managed identity).
    AssertionFile(PathBuf),
}

impl fmt::Debug for ClientCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secret(_) => f.write_str("Secret(..)"),
            Self::AssertionFile(path) => f.debug_tuple("AssertionFile").field(path).finish(),
        }
    }
}

/// One exchange: trade `assertion` for a token scoped to `audience`/`scopes`.
#[derive(Clone)]
pub struct ExchangeRequest {
    pub assertion: String,
    pub audience: String,
    pub scopes: Vec<String>,
}

impl fmt::Debug for ExchangeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeRequest")
            .field("audience", &self.audience)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct ExchangedToken {
    pub access_token: String,
    // Seconds until expiry.
    pub expires_in: u64,
}

impl fmt::Debug for ExchangedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangedToken")
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("user consent required: {description}")]
    ConsentRequired { description: String },

    #[error("token exchange rejected ({status}): {error}")]
    Rejected {
        status: StatusCode,
        error: String,
        description: Option<String>,
    },

    #[error("token endpoint unavailable: {0}")]
    Unavailable(String),
}

impl ExchangeError {
    pub fn is_consent_required(&self) -> bool {
        matches!(self, Self::ConsentRequired { .. })
    }
}

/// The external token-exchange capability.
#[async_trait]
pub trait TokenExchanger: Send + Sync + 'static {
    async fn exchange(&self, request: &ExchangeRequest) -> Result<ExchangedToken, ExchangeError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default, deserialize_with = "number_or_string")]
    expires_in: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    suberror: Option<String>,
    #[serde(default)]
    error_codes: Vec<u64>,
}

// Some token endpoints send `expires_in` as a string.
fn number_or_string<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
    }
}

fn classify(status: StatusCode, body: TokenErrorResponse) -> ExchangeError {
    let consent = matches!(body.error.as_str(), "consent_required" | "interaction_required")
        || body.suberror.as_deref() == Some("consent_required")
        || body.error_codes.contains(&CONSENT_ERROR_CODE);

    if consent {
        return ExchangeError::ConsentRequired {
            description: body
                .error_description
                .unwrap_or_else(|| "consent has not been granted for the requested scopes".into()),
        };
    }

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return ExchangeError::Unavailable(format!("token endpoint returned {status}"));
    }

    ExchangeError::Rejected {
        status,
        error: if body.error.is_empty() {
            "unknown_error".to_string()
        } else {
            body.error
        },
        description: body.error_description,
    }
}

/// `TokenExchanger` over HTTP (form-encoded POST to the token endpoint).
pub struct HttpTokenExchanger {
    http: reqwest::Client,
    endpoint: Url,
    client_id: String,
    credential: ClientCredential,
    grant: ExchangeGrant,
}

impl fmt::Debug for HttpTokenExchanger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTokenExchanger")
            .field("endpoint", &self.endpoint.as_str())
            .field("client_id", &self.client_id)
            .field("grant", &self.grant)
            .finish()
    }
}

impl HttpTokenExchanger {
    pub fn new(
        endpoint: Url,
        client_id: String,
        credential: ClientCredential,
        grant: ExchangeGrant,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint,
            client_id,
            credential,
            grant,
        })
    }

    async fn form(&self, request: &ExchangeRequest) -> Result<Vec<(&'static str, String)>, ExchangeError> {
        let scope = request.scopes.join(" ");
        let mut form: Vec<(&'static str, String)> = match self.grant {
            ExchangeGrant::JwtBearer => vec![
                ("grant_type", GRANT_TYPE_JWT_BEARER.to_string()),
                ("assertion", request.assertion.clone()),
                ("requested_token_use", "on_behalf_of".to_string()),
                ("scope", scope),
            ],
            ExchangeGrant::TokenExchange => vec![
                ("grant_type", GRANT_TYPE_TOKEN_EXCHANGE.to_string()),
                ("subject_token", request.assertion.clone()),
                ("subject_token_type", TOKEN_TYPE_ACCESS_TOKEN.to_string()),
                ("requested_token_type", TOKEN_TYPE_ACCESS_TOKEN.to_string()),
                ("audience", request.audience.clone()),
                ("scope", scope),
            ],
        };

        form.push(("client_id", self.client_id.clone()));
        match &self.credential {
            ClientCredential::Secret(secret) => form.push(("client_secret", secret.clone())),
            ClientCredential::AssertionFile(path) => {
                // Re-read on every call: the platform rotates this file.
                let assertion = tokio::fs::read_to_string(path).await.map_err(|e| {
                    ExchangeError::Unavailable(format!("cannot read client assertion: {e}"))
                })?;
                form.push(("client_assertion_type", CLIENT_ASSERTION_TYPE_JWT_BEARER.to_string()));
                form.push(("client_assertion", assertion.trim().to_string()));
            }
        }

        Ok(form)
    }
}

#[async_trait]
impl TokenExchanger for HttpTokenExchanger {
    async fn exchange(&self, request: &ExchangeRequest) -> Result<ExchangedToken, ExchangeError> {
        let form = self.form(request).await?;

        let response = self
            .http
            .post(self.endpoint.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| ExchangeError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            // An unreadable error body still tells us the status class.
            let body = response
                .json::<TokenErrorResponse>()
                .await
                .unwrap_or_default();
            return Err(classify(status, body));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ExchangeError::Unavailable(format!("malformed token response: {e}")))?;

        Ok(ExchangedToken {
            access_token: token.access_token,
            expires_in: token.expires_in.unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn request() -> ExchangeRequest {
        ExchangeRequest {
            assertion: "inbound.jwt.value".into(),
            audience: "api://downstream".into(),
            scopes: vec!["api://downstream/.default".into()],
        }
    }

    fn exchanger(server: &MockServer, grant: ExchangeGrant) -> HttpTokenExchanger {
        HttpTokenExchanger::new(
            Url::parse(&format!("{}/oauth2/v2.0/token", server.uri())).unwrap(),
            "relay-client".into(),
            ClientCredential::Secret("s3cret".into()),
            grant,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn jwt_bearer_grant_posts_on_behalf_of_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v2.0/token"))
            .and(body_string_contains("requested_token_use=on_behalf_of"))
            .and(body_string_contains("assertion=inbound.jwt.value"))
            .and(body_string_contains("client_secret=s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token_type": "Bearer",
                "access_token": "exchanged",
                "expires_in": "3599",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = exchanger(&server, ExchangeGrant::JwtBearer)
            .exchange(&request())
            .await
            .unwrap();

        assert_eq!(token.access_token, "exchanged");
        assert_eq!(token.expires_in, 3599);
    }

    #[tokio::test]
    async fn token_exchange_grant_sends_subject_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("subject_token=inbound.jwt.value"))
            .and(body_string_contains("grant-type%3Atoken-exchange"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "exchanged",
                "expires_in": 600,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = exchanger(&server, ExchangeGrant::TokenExchange)
            .exchange(&request())
            .await
            .unwrap();
        assert_eq!(token.expires_in, 600);
    }

    #[tokio::test]
    async fn consent_error_code_is_consent_required() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "AADSTS65001: The user or administrator has not consented",
                "error_codes": [65001],
                "suberror": "consent_required",
            })))
            .mount(&server)
            .await;

        let err = exchanger(&server, ExchangeGrant::JwtBearer)
            .exchange(&request())
            .await
            .unwrap_err();
        assert!(err.is_consent_required());
    }

    #[tokio::test]
    async fn invalid_grant_is_rejected_and_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "AADSTS500133: Assertion is not within its valid time range.",
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = exchanger(&server, ExchangeGrant::JwtBearer);

        let first = client.exchange(&request()).await.unwrap_err();
        assert!(matches!(first, ExchangeError::Rejected { ref error, .. } if error == "invalid_grant"));

        let second = client.exchange(&request()).await.unwrap_err();
        assert!(matches!(second, ExchangeError::Unavailable(_)));
    }

    #[test]
    fn grant_names_parse() {
        assert_eq!("obo".parse::<ExchangeGrant>().unwrap(), ExchangeGrant::JwtBearer);
        assert_eq!(
            "token-exchange".parse::<ExchangeGrant>().unwrap(),
            ExchangeGrant::TokenExchange
        );
        assert!("password".parse::<ExchangeGrant>().is_err());
    }

    #[test]
    fn secrets_are_not_printed() {
        let printed = format!("{:?}", ClientCredential::Secret("s3cret".into()));
        assert!(!printed.contains("s3cret"));
        assert!(!format!("{:?}", request()).contains("inbound.jwt.value"));
    }
}
