//! Mocri Server
//!
//! Serves an OCR pipeline over HTTP: model listing, binarization, line
//! segmentation and text recognition with lazily downloaded models.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mocri_server::config::Config;
use mocri_server::engine::NativeEngine;
use mocri_server::inventory::load_inventory;
use mocri_server::models::{HttpRegistry, ModelResolver};
use mocri_server::pipeline::Pipeline;
use mocri_server::routes;
use mocri_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "mocri_server=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        Config::default()
    });

    tracing::info!("Starting Mocri Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Model directory: {}", config.models.model_dir.display());
    tracing::info!("Model registry: {}", config.inventory.registry_url);

    let registry = Arc::new(
        HttpRegistry::new(
            &config.inventory.registry_url,
            Duration::from_secs(config.inventory.http_timeout_secs),
        )
        .context("Failed to initialize registry client")?,
    );

    // Without an inventory there is nothing to serve
    let inventory = load_inventory(&config.inventory, registry.as_ref())
        .await
        .context("Failed to load model inventory")?;
    tracing::info!("Inventory initialized with {} models", inventory.len());

    let resolver = ModelResolver::new(config.models.model_dir.clone(), registry);

    let engine = NativeEngine::from_command_line(config.engine.recognizer_command.as_deref());
    if !engine.has_recognizer() {
        tracing::warn!("No recognizer command configured; text recognition is disabled");
    }

    let pipeline = Pipeline::new(
        Arc::new(inventory),
        Arc::new(resolver),
        Arc::new(engine),
        config.engine.max_jobs,
    );

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let host = config.server.host.clone();
    let port = config.server.port;
    let app = routes::router(AppState::new(config, pipeline))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server with graceful shutdown
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", host, port))?;
    tracing::info!("Mocri Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
