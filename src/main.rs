mod config;
mod credential;
mod error;
mod handlers;
mod job;
mod models;
mod queue;
mod registry;
mod relay;
mod sender;
mod state;
mod subscription;

use std::{sync::Arc, time::Duration};

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{
    config::Config,
    handlers::{cancel_location, health, receive_callback, request_location},
    queue::CallbackQueue,
    relay::Relay,
    sender::Sender,
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = Arc::new(Config::from_env()?);
    info!(
        bind_addr = %cfg.bind_addr,
        callback_bind_addr = %cfg.callback_bind_addr,
        api_prefix = %cfg.api_prefix,
        provider_url = %cfg.provider_url,
        recurring_enabled = cfg.recurring_enabled,
        token_file = ?cfg.access_token_file,
        operator_cancel = cfg.operator_token.is_some(),
        "starting location relay"
    );
    if cfg.recurring_enabled {
        info!(
            max_report_count = cfg.recurring.max_report_count,
            report_period_secs = cfg.recurring.report_period_secs,
            notification_endpoint = %cfg.recurring.notification_endpoint,
            "recurring location reporting enabled"
        );
    }

    let queue = CallbackQueue::new();
    let relay = Arc::new(Relay::new(cfg.clone(), Sender::new()?, queue.clone()));
    let state = AppState::new(cfg.clone(), relay.clone(), queue);

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let api_listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    let callback_listener = tokio::net::TcpListener::bind(&cfg.callback_bind_addr).await?;
    info!("listening on {}", cfg.bind_addr);
    info!("callback intake listening on {}", cfg.callback_bind_addr);

    let api = axum::serve(api_listener, api_router(state.clone()))
        .with_graceful_shutdown(wait_for(shutdown.clone()));
    let callbacks = axum::serve(callback_listener, callback_router(state))
        .with_graceful_shutdown(wait_for(shutdown.clone()));
    tokio::try_join!(async { api.await }, async { callbacks.await })?;

    relay
        .shutdown(Duration::from_secs(cfg.shutdown_grace_secs))
        .await;
    info!("shutdown complete");
    Ok(())
}

fn api_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let prefix = state.cfg.api_prefix.clone();
    let body_limit = state.cfg.max_body_bytes;

    Router::new()
        .route("/health", get(health))
        .route(
            &format!("{prefix}/location"),
            post(request_location).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route(&format!("{prefix}/location/:task_id"), delete(cancel_location))
        .layer(cors)
        .with_state(state)
}

// Served on its own listener, not advertised to clients.
fn callback_router(state: AppState) -> Router {
    let body_limit = state.cfg.callback_max_body_bytes;
    Router::new()
        .route(
            "/_internal/callback",
            post(receive_callback).layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}

async fn wait_for(token: CancellationToken) {
    token.cancelled().await;
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
