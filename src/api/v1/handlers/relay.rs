/*
 * Responsibility
 * - GET /api/v1/relay/{target}
 * - target の mode (forward / obo) に従って downstream を呼び、envelope に包んで返す
 * - エラーは RelayError → AppError で status class に変換
 */
use axum::{
    Json,
    extract::{Path, State},
};

use crate::api::v1::dto::relay::RelayResponse;
use crate::api::v1::extractors::AuthCtxExtractor;
use crate::error::AppError;
use crate::state::AppState;

pub async fn relay(
    State(state): State<AppState>,
    Path(target): Path<String>,
    AuthCtxExtractor(ctx): AuthCtxExtractor,
) -> Result<Json<RelayResponse>, AppError> {
    let outcome = state.relay.dispatch(ctx.credential(), &target).await?;
    Ok(Json(outcome.into()))
}
