//! Receiving VASP HTTP server.
//!
//! # Usage
//!
//! ```bash
//! # Run with default config (config.toml in current directory)
//! cargo run -p uma-vasp --release
//!
//! # Run with custom config path
//! uma-vasp --config /path/to/config.toml
//!
//! # Configure logging level
//! RUST_LOG=debug uma-vasp
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to TOML configuration file (default: `config.toml`)
//! - `HOST` - Override bind address (default: `0.0.0.0`)
//! - `PORT` - Override port (default: `8080`)
//! - `RUST_LOG` - Log level filter (default: `info`)
//!
//! Variables may also be set in a `.env` file.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::Method;
use axum::{Json, Router};
use clap::Parser;
use tower_http::cors;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use uma::handshake::{KeyResolver, ReceivingVasp};
use uma::nonce::InMemoryNonceValidator;
use uma::pubkey_cache::InMemoryPublicKeyCache;
use uma::timestamp::UnixTimestamp;
use uma_http::HttpTransport;

use uma_vasp::config::VaspConfig;
use uma_vasp::demo::{BlockListCompliance, ConfiguredUsers, PlaceholderInvoices};
use uma_vasp::maintenance::purge_nonces;
use uma_vasp::util::SigDown;
use uma_vasp::{AppState, vasp_router};

/// Receiving VASP server for UMA payments.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, short, env = "CONFIG", default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(Args::parse()).await {
        tracing::error!("VASP server failed: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    // reqwest and any TLS client in the process share this provider.
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    let config = VaspConfig::load_from(&args.config)?;
    let identity = config.identity()?;
    let users = ConfiguredUsers::from_config(&config)?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        domain = identity.domain(),
        users = users.len(),
        currencies = config.currencies.len(),
        "Loaded configuration"
    );
    if users.is_empty() {
        tracing::warn!("No users configured, every LNURLp request will be answered with user_not_found");
    }

    let transport = HttpTransport::new().with_timeout(config.step_timeout());
    let keys = KeyResolver::new(
        Arc::new(InMemoryPublicKeyCache::new()),
        Arc::new(transport),
        config.step_timeout(),
    );
    let retention = config.nonce_retention();
    let nonces = Arc::new(InMemoryNonceValidator::new(UnixTimestamp::now() - retention));

    let sig_down = SigDown::try_new()?;
    let receiver = ReceivingVasp::new(
        identity,
        keys,
        Arc::clone(&nonces) as _,
        Arc::new(users),
        Arc::new(BlockListCompliance::new(&config.blocked_vasp_domains)),
        Arc::new(PlaceholderInvoices::default()),
    )
    .with_config(config.handshake_config())
    .with_cancellation(sig_down.cancellation_token());

    let mut state = AppState::new(receiver);
    match config.webhook_secret() {
        Some(secret) => state = state.with_webhook_secret(secret),
        None => tracing::warn!("webhook_secret not set, webhooks will be refused"),
    }

    let purge = tokio::spawn(purge_nonces(
        Arc::clone(&nonces),
        retention,
        sig_down.cancellation_token(),
    ));

    let app = Router::new()
        .merge(vasp_router(Arc::new(state)))
        .route("/health", axum::routing::get(health))
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("VASP listening on http://{addr}");

    let shutdown = sig_down.cancellation_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    sig_down.recv().await;
    purge.await?;
    tracing::info!("VASP shut down gracefully");
    Ok(())
}

/// Health check endpoint.
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
