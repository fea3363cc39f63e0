/*
 * Responsibility
 * - Handler から見える「認証済みコンテキスト」の型
 * - middleware が検証して request extensions に格納し、handler はこの型だけを受け取る
 *
 * Notes
 * - JWT の検証ロジックは middleware/services 側の責務
 * - relay handler は元の Authorization header (forward 用) と token (OBO 用) を必要とするので
 *   IncomingCredential ごと持つ
 */
use std::sync::Arc;

use crate::services::auth::{Identity, IncomingCredential};

/// 認証済みのリクエストに付与されるコンテキスト
///
/// - Clone は Arc のコピーのみ
/// - token は Debug に出ない (IncomingCredential 側でマスク)
#[derive(Debug, Clone)]
pub struct AuthCtx {
    credential: Arc<IncomingCredential>,
}

impl AuthCtx {
    pub fn new(credential: IncomingCredential) -> Self {
        Self {
            credential: Arc::new(credential),
        }
    }

    pub fn credential(&self) -> &IncomingCredential {
        &self.credential
    }

    pub fn identity(&self) -> &Identity {
        self.credential.identity()
    }
}
