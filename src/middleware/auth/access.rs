//! access token（JWT）検証 → AuthCtx を extensions に入れる
//!
//! - `Authorization: Bearer <jwt>` を受け取り、RelayOrchestrator::authenticate で
//!   署名 / exp / nbf / iss / aud を検証して identity を射影する
//! - 失敗時は handler に到達させず 401 (downstream は一切呼ばない)
//! - token そのものはログに出さない（fingerprint のみ）

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::{self, Next},
    response::Response,
};

use crate::api::v1::extractors::AuthCtx;
use crate::error::AppError;
use crate::services::relay::RelayError;
use crate::state::AppState;

/// `/api/v1/*` に認証を掛けるための middleware を適用する。
///
/// 例：
/// ```ignore
/// let v1 = api::v1::routes::router();
/// let v1 = middleware::auth::access::apply(v1, state.clone());
/// app = app.nest("/api/v1", v1);
/// ```
pub fn apply(router: Router<AppState>, state: AppState) -> Router<AppState> {
    // axum 0.8 の from_fn は State extractor を受け取れないため、`from_fn_with_state` で明示的に state を渡す
    router.layer(middleware::from_fn_with_state(state, access_middleware))
}

async fn access_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let authorization = req.headers().get(header::AUTHORIZATION);

    let credential = match state.relay.authenticate(authorization).await {
        Ok(credential) => credential,
        Err(err) => {
            if matches!(err, RelayError::MissingCredential) {
                tracing::debug!(path = %req.uri().path(), "request without bearer token");
            }
            return Err(err.into());
        }
    };

    tracing::debug!(
        user = %credential.identity().display_name,
        user_id = %credential.identity().subject_id,
        "access token verified"
    );

    // middleware → extractor への受け渡し
    req.extensions_mut().insert(AuthCtx::new(credential));

    Ok(next.run(req).await)
}
