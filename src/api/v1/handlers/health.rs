/*
 * Responsibility
 * - GET /health (疎通用, 認証なし)
 * - GET / (banner)
 */
use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::json;

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

pub async fn banner() -> &'static str {
    concat!("obo-relay ", env!("CARGO_PKG_VERSION"), " is running")
}
