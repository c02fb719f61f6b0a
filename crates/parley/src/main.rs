//! Parley gateway binary: CLI parsing, logging init, and server startup.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use parley_backend::{HttpBackend, HttpSuggestionGenerator};
use parley_server::{AppState, router, spawn_event_pump};
use parley_session::{ChatService, ChatServiceConfig};
use parley_settings::load_settings;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Real-time conversational gateway.
#[derive(Debug, Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Path to a JSON settings file.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Listen port (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Conversation backend base URL (overrides settings).
    #[arg(long)]
    backend_url: Option<String>,
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = load_settings(cli.settings.as_deref()).context("loading settings")?;
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if let Some(url) = cli.backend_url {
        settings.backend.base_url = url;
    }
    init_tracing(&settings.logging.level);

    let metrics_handle = parley_server::metrics::install_recorder();

    let api_key = settings.backend.api_key.as_deref();
    let backend = Arc::new(HttpBackend::new(settings.backend.base_url.clone(), api_key));
    let suggestions = Arc::new(HttpSuggestionGenerator::new(
        settings.backend.base_url.clone(),
        api_key,
    ));
    let service = ChatService::new(
        backend,
        suggestions,
        ChatServiceConfig {
            idle_timeout: settings.session.idle_timeout(),
            sweep_interval: settings.session.sweep_interval(),
        },
    );

    let state = AppState::new(Arc::clone(&service));
    let pump = spawn_event_pump(state.clone());
    let app = router(state, metrics_handle);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(
        addr = %addr,
        backend = %settings.backend.base_url,
        "parley gateway listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("server error")?;

    service.shutdown().await;
    pump.abort();
    Ok(())
}
