/*
 * Responsibility
 * - v1 の URL 構造を定義
 * - /me, /relay/{target} はすべて Bearer 必須 (access middleware をここで掛ける)
 */
use axum::{Router, routing::get};

use crate::api::v1::handlers::{me::me, relay::relay};
use crate::middleware::auth::access;
use crate::state::AppState;

pub fn routes(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/me", get(me))
        .route("/relay/{target}", get(relay));

    access::apply(protected, state)
}
