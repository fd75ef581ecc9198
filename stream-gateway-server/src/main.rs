//! Media streaming gateway server: fronts usenet/debrid/HTTP video
//! sources and serves direct-proxy, MP4-transmux, or segmented-HLS
//! playback over HTTP.

mod collaborators_stub;
mod config;
mod error;
mod http;
mod provider_fs;
mod settings;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::http::create_router;
use crate::provider_fs::LocalFsProvider;
use crate::state::AppState;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const APP_NAME: &str = "stream-gateway-server";

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    tracing::info!("{} v{} starting", APP_NAME, VERSION);

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let config = if std::path::Path::new(&config_path).exists() {
        match ServerConfig::from_file(&config_path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(
                    "failed to load config file {}: {}. using defaults.",
                    config_path,
                    e
                );
                ServerConfig::default()
            }
        }
    } else {
        ServerConfig::default()
    };
    tracing::info!(?config, "configuration loaded");

    let provider_root =
        std::env::var("STREAM_GATEWAY_MEDIA_ROOT").unwrap_or_else(|_| "/media".to_string());
    let provider = Arc::new(LocalFsProvider::new(provider_root));

    let state = Arc::new(AppState::new(config.clone(), provider));

    spawn_reapers(state.clone());

    let app = create_router(state.clone());

    let addr: SocketAddr = config
        .socket_addr()
        .parse()
        .map_err(|e| error::ServerError::Config(format!("invalid bind address: {e}")))?;
    tracing::info!("starting HTTP server on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| error::ServerError::Config(format!("failed to bind {addr}: {e}")))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| error::ServerError::Config(e.to_string()))?;

    Ok(())
}

/// Idle HLS sessions, idle subtitle extraction sessions, expired
/// prequeue entries, and stale probe-cache entries each reap on their
/// own interval rather than sharing one loop, since their idle
/// thresholds differ.
fn spawn_reapers(state: Arc<AppState>) {
    let hls_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let n = hls_state.hls.reap_idle().await;
            if n > 0 {
                tracing::info!("reaped {n} idle hls session(s)");
            }
        }
    });

    let subtitle_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let n = subtitle_state.subtitles.reap_idle().await;
            if n > 0 {
                tracing::info!("reaped {n} idle subtitle extraction session(s)");
            }
        }
    });

    let prequeue_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let n = prequeue_state.prequeue_store.reap_expired().await;
            if n > 0 {
                tracing::info!("reaped {n} expired prequeue entries");
            }
        }
    });

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let n = state.probe_cache.evict_expired();
            if n > 0 {
                tracing::debug!("evicted {n} stale probe cache entries");
            }
        }
    });
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "stream_gateway_server=info,stream_gateway_core=info,tower_http=info".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
