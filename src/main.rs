use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use tokio::signal;
use tracing::{error, info};

mod api;
mod availability;
mod backends;
mod cache;
mod classifier;
mod config;
mod error;
mod fingerprint;
mod oauth;
mod pipeline;
mod router;
mod translate;
mod types;

pub use config::Config;
pub use error::GatewayError;

/// Exit codes: 0 clean shutdown, 1 config error, 2 port bind failure.
const EXIT_CONFIG: i32 = 1;
const EXIT_BIND: i32 = 2;

#[tokio::main]
async fn main() {
    // LOG_LEVEL is the documented knob; RUST_LOG still wins when set.
    let default_filter = std::env::var("LOG_LEVEL")
        .map(|level| format!("inferswitch={level},tower_http=warn"))
        .unwrap_or_else(|_| "inferswitch=info,tower_http=warn".into());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    let config_path = std::env::var("INFERSWITCH_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("inferswitch.json"));

    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %config_path.display(), error = %e, "configuration error");
            std::process::exit(EXIT_CONFIG);
        }
    };

    info!(
        port = config.port,
        backends = config.backends.len(),
        models = config.model_providers.len(),
        cache_enabled = config.cache.enabled,
        "inferswitch starting"
    );

    let state = Arc::new(pipeline::GatewayState::new(Arc::new(config)));
    let port = state.config().port;

    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind listen port");
            std::process::exit(EXIT_BIND);
        }
    };
    info!(%addr, "listening");

    let trace_layer = tower_http::trace::TraceLayer::new_for_http()
        .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO))
        .on_response(tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO));

    let app = api::router(state).layer(trace_layer);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if let Err(e) = served {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
    info!("shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
