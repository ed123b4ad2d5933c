//! PostFiat Gateway
//!
//! A thin HTTP front for the envelope protocol core:
//!
//! 1. **Envelope storage**: accepts encoded envelopes (whole or as parts),
//!    checks their integrity, and indexes them by id, content hash,
//!    public context reference and sender.
//!
//! 2. **Content routing**: stores and fetches content-addressed blobs across
//!    the configured backends (inline, cache, filesystem, IPFS).
//!
//! **Privacy**: the gateway never holds key material. Protected envelopes are
//! stored and served as the opaque bytes they arrived as.

mod api;
mod state;

use std::path::PathBuf;
use std::time::Duration;

use axum::{extract::State, http::Method, response::IntoResponse, routing::get, Json, Router};
use clap::Parser;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use state::{GatewayConfig, GatewayState};

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "postfiat-gateway", version, about = "PostFiat envelope gateway")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8080, env = "GATEWAY_PORT")]
    port: u16,

    /// Directory for the envelope database and filesystem content.
    /// Everything stays in memory when unset.
    #[arg(long, env = "GATEWAY_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// IPFS HTTP API base URL (e.g. http://127.0.0.1:5001)
    #[arg(long, env = "IPFS_API_URL")]
    ipfs_api_url: Option<String>,

    /// Largest envelope part accepted from the transport, in bytes
    #[arg(long, default_value_t = postfiat_core::config::DEFAULT_MAX_ENVELOPE_SIZE, env = "MAX_ENVELOPE_SIZE")]
    max_envelope_size: usize,

    /// Content at or below this size is stored inline in its descriptor
    #[arg(long, default_value_t = postfiat_core::config::DEFAULT_INLINE_THRESHOLD, env = "INLINE_THRESHOLD")]
    inline_threshold: usize,

    /// Disable the in-memory content cache backend
    #[arg(long, env = "DISABLE_CACHE")]
    disable_cache: bool,

    /// Seconds a partially received message may sit idle
    #[arg(long, default_value_t = postfiat_core::config::DEFAULT_REASSEMBLY_TIMEOUT_SECS, env = "REASSEMBLY_TIMEOUT_SECS")]
    reassembly_timeout_secs: u64,

    /// Cleanup interval in seconds
    #[arg(long, default_value_t = 60, env = "CLEANUP_INTERVAL_SECS")]
    cleanup_interval_secs: u64,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl From<Args> for GatewayConfig {
    fn from(args: Args) -> Self {
        Self {
            port: args.port,
            data_dir: args.data_dir,
            ipfs_api_url: args.ipfs_api_url.filter(|url| !url.trim().is_empty()),
            max_envelope_size: args.max_envelope_size,
            inline_threshold: args.inline_threshold,
            enable_cache: !args.disable_cache,
            reassembly_timeout_secs: args.reassembly_timeout_secs,
            cleanup_interval_secs: args.cleanup_interval_secs,
        }
    }
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "postfiat_gateway=info,postfiat_core=info,tower_http=info".into());
    if args.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = GatewayConfig::from(args);
    let port = config.port;
    let cleanup_interval = config.cleanup_interval_secs;

    let state = match GatewayState::open(config).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(code = e.code(), error = %e, "Failed to open gateway state");
            std::process::exit(1);
        }
    };

    // Spawn periodic cleanup task
    let cleanup_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(cleanup_interval));
        loop {
            interval.tick().await;
            cleanup_state.cleanup_expired();
        }
    });

    let app = build_app(state);

    let addr = format!("0.0.0.0:{}", port);
    tracing::info!("PostFiat gateway starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app).await.expect("Server error");
}

/// All routes with CORS and request tracing.
pub(crate) fn build_app(state: GatewayState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::HEAD])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/info", get(info_handler))
        .merge(api::routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Route Handlers ────────────────────────────────────────────────────────────

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "postfiat-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Server info endpoint.
async fn info_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    let backends: Vec<&str> = state
        .content
        .backend_info()
        .into_iter()
        .map(|kind| kind.name())
        .collect();
    Json(json!({
        "service": "postfiat-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "core_version": postfiat_core::version(),
        "protocol_version": postfiat_core::protocol_version(),
        "max_envelope_size": state.config.max_envelope_size,
        "storage_backends": backends,
        "persistent": state.config.data_dir.is_some(),
        "pending_messages": state.assembler.pending_count(),
        "started_at": state.started_at,
        "timestamp": chrono::Utc::now().timestamp_millis(),
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
