/*
 * Responsibility
 * - GET /api/v1/me の response DTO
 * - raw claims は RELAY_EXPOSE_CLAIMS が有効なときだけ載せる
 */
use serde::Serialize;
use serde_json::{Map, Value};

use crate::services::auth::Identity;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub user: String,
    pub user_id: String,
    pub roles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claims: Option<Map<String, Value>>,
}

impl MeResponse {
    pub fn new(identity: &Identity, claims: Option<&Map<String, Value>>) -> Self {
        Self {
            user: identity.display_name.clone(),
            user_id: identity.subject_id.clone(),
            roles: identity.roles.clone(),
            claims: claims.cloned(),
        }
    }
}
