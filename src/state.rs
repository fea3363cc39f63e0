/*
 * Responsibility
 * - Router に紐づける共有コンテキスト (AppState)
 *   - relay: token 検証 + forward/OBO + downstream 呼び出しをまとめた orchestrator
 *   - expose_claims: /me で raw claims を返すか (debug 用 opt-in)
 * - Clone 前提で持つ (内部は Arc/Clone cheap)
 */
use std::sync::Arc;

use crate::services::relay::RelayOrchestrator;

#[derive(Clone, Debug)]
pub struct AppState {
    pub relay: Arc<RelayOrchestrator>,
    pub public_api_url: Arc<str>,
    pub expose_claims: bool,
}

impl AppState {
    pub fn new(relay: Arc<RelayOrchestrator>, public_api_url: &str, expose_claims: bool) -> Self {
        Self {
            relay,
            public_api_url: Arc::from(public_api_url),
            expose_claims,
        }
    }
}
