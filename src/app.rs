/*
 * Responsibility
 * - tracing / panic hook の初期化
 * - Config読み込み → 依存生成 (validator / downstream pool / OBO exchanger) → Router 組み立て
 * - Middleware の適用 (HTTP / security headers / CORS / Bearer)
 * - axum::serve() で起動
 */
use std::{panic, process, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api;
use crate::api::v1::handlers::{config::client_config, health};
use crate::config::Config;
use crate::error::AppError;
use crate::middleware;
use crate::services::auth::build_token_validator;
use crate::services::downstream::DownstreamPool;
use crate::services::obo::{
    ExchangeCache, HttpTokenExchanger, InMemoryExchangeCache, OboExchanger, spawn_purge_task,
};
use crate::services::relay::RelayOrchestrator;
use crate::state::AppState;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(60);

fn init_tracing() {
    // Prefer RUST_LOG if set; otherwise use a sensible default.
    // Ex:
    // RUST_LOG=info,obo_relay=debug,tower_http=debug cargo run
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn init_panic_hook(abort_on_panic: bool) {
    // Keep the default hook as a fallback (prints to stderr with location/payload).
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        tracing::error!(?info, "panic");

        // development は即落として気付けるようにする
        if abort_on_panic {
            process::abort();
        } else {
            default_hook(info);
        }
    }))
}

pub async fn run() -> Result<()> {
    init_tracing();
    let config = Config::from_env().context("loading configuration")?;

    init_panic_hook(!config.app_env.is_production());

    tracing::info!(
        "starting relay in {:?} mode on {}",
        config.app_env,
        config.addr
    );

    let state = build_state(&config).await?;
    let app = build_router(state, &config);

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("binding {}", config.addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}

pub(crate) async fn build_state(config: &Config) -> Result<AppState> {
    let validator = build_token_validator(config).await?;

    let pool = DownstreamPool::new(&config.downstream_targets, config.downstream_timeout)
        .context("building downstream clients")?;

    for target in &config.downstream_targets {
        tracing::info!(
            downstream = %target.name,
            mode = %target.mode,
            base_url = %target.base_url,
            audience = %target.audience,
            "downstream target registered"
        );
    }

    let obo = match &config.exchange {
        Some(exchange) => {
            let exchanger = HttpTokenExchanger::new(
                exchange.token_endpoint.clone(),
                exchange.client_id.clone(),
                exchange.credential.clone(),
                exchange.grant,
                config.downstream_timeout,
            )
            .context("building token exchange client")?;

            let cache: Arc<dyn ExchangeCache> = Arc::new(InMemoryExchangeCache::new());
            spawn_purge_task(cache.clone(), CACHE_PURGE_INTERVAL);

            Some(OboExchanger::new(
                Arc::new(exchanger),
                cache,
                exchange.retry_backoff,
                exchange.expiry_skew,
            ))
        }
        None => None,
    };

    let relay = Arc::new(RelayOrchestrator::new(validator, pool, obo));
    Ok(AppState::new(
        relay,
        &config.public_api_url,
        config.expose_claims,
    ))
}

pub(crate) fn build_router(state: AppState, config: &Config) -> Router {
    let router = Router::new()
        .route("/", get(health::banner))
        .route("/health", get(health::health))
        .route("/api/config", get(client_config))
        .nest("/api/v1", api::v1::routes(state.clone()))
        .fallback(|| async { AppError::not_found("Resource") })
        .with_state(state);

    let router = middleware::security_headers::apply(router);
    let router = middleware::cors::apply(router, config);
    middleware::http::apply(router, REQUEST_TIMEOUT)
}
