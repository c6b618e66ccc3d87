use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::routing::get;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use unigate_core::engine::spawn_config_watcher;
use unigate_core::upstream::WreqUpstreamClient;
use unigate_core::ProxyEngine;
use unigate_provider::{FileConfigSource, MemoryLogSink, UpstreamClient, load_config};

mod cli;

const LOG_BUFFER_RECORDS: usize = 500;
const LOG_FEED_BUFFER: usize = 64;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = cli::Cli::parse();
    let config = load_config(&args.config).with_context(|| {
        format!("failed to load configuration from {}", args.config.display())
    })?;

    let logs = Arc::new(MemoryLogSink::new(LOG_BUFFER_RECORDS, LOG_FEED_BUFFER));

    // The client resolves the egress proxy per request through the engine, so
    // a reloaded `preferences.proxy` applies without restarting.
    let engine_slot: Arc<OnceLock<Arc<ProxyEngine>>> = Arc::new(OnceLock::new());
    let resolver_slot = engine_slot.clone();
    let client: Arc<dyn UpstreamClient> = Arc::new(WreqUpstreamClient::with_proxy_resolver(
        move || {
            resolver_slot
                .get()
                .and_then(|engine| engine.config().preferences.proxy.clone())
        },
    ));

    let engine = Arc::new(ProxyEngine::new(config, client, logs.clone()));
    let _ = engine_slot.set(engine.clone());

    engine.spawn_hydration();
    let source = Arc::new(FileConfigSource::new(&args.config));
    spawn_config_watcher(engine.clone(), source);

    let app = axum::Router::new()
        .nest(
            "/admin",
            unigate_router::admin_router(engine.clone(), logs.clone()),
        )
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .merge(unigate_router::gateway_router(engine.clone()));

    let bind = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(
        bind = %bind,
        providers = engine.config().providers.len(),
        "unigate ready"
    );
    axum::serve(listener, app).await?;
    Ok(())
}
