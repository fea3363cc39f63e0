/*
 * Responsibility
 * - GET /api/v1/relay/{target} の response envelope
 * - backendResponse は downstream の body をそのまま (加工しない)
 * - OBO 経由のときは note / targetAudience を追加
 */
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::services::downstream::RelayMode;
use crate::services::relay::RelayOutcome;

pub const OBO_NOTE: &str = "This data was retrieved using an OBO (On-Behalf-Of) token";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayResponse {
    pub message: String,
    pub called_by: String,
    pub backend_response: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_audience: Option<String>,
}

impl From<RelayOutcome> for RelayResponse {
    fn from(outcome: RelayOutcome) -> Self {
        let obo = outcome.mode() == RelayMode::OnBehalfOf;
        Self {
            message: format!("Successfully called {}", outcome.target.name),
            called_by: outcome.identity.display_name,
            backend_response: outcome.body,
            timestamp: Utc::now(),
            note: obo.then_some(OBO_NOTE),
            target_audience: obo.then(|| outcome.target.audience.clone()),
        }
    }
}
