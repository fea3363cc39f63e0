/*
 * Responsibility
 * - GET /api/config: SPA が叩くべき API の URL を返す (認証なし)
 */
use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::state::AppState;

pub async fn client_config(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "apiUrl": &*state.public_api_url }))
}
