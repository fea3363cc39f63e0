/*
 * Responsibility
 * - GET /api/v1/me: 検証済み token から射影した identity を返す
 */
use axum::{Json, extract::State};

use crate::api::v1::dto::me::MeResponse;
use crate::api::v1::extractors::AuthCtxExtractor;
use crate::state::AppState;

pub async fn me(
    State(state): State<AppState>,
    AuthCtxExtractor(ctx): AuthCtxExtractor,
) -> Json<MeResponse> {
    let claims = state.expose_claims.then(|| ctx.credential().claims());
    Json(MeResponse::new(ctx.identity(), claims))
}
