/*
 * Responsibility
 * - ドメイン側のサービス群 (HTTP framework に依存しない部分)
 *   - auth: inbound token 検証 + claim 射影
 *   - downstream: downstream ごとの HTTP client
 *   - obo: On-Behalf-Of token 交換 + cache
 *   - relay: 上記をまとめる orchestrator
 */
pub mod auth;
pub mod downstream;
pub mod obo;
pub mod relay;
