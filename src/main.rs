mod config;
mod models;
mod routes;
mod services;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::models::{AddonConfig, ResolvedStream};
use crate::services::{
    channel_cache::{CacheEvent, ChannelCache},
    epg::{time::parse_timezone, EpgIngestor, HttpFetcher},
    resolver::{PassthroughResolver, StreamResolver},
    scheduler::parse_schedule,
    stream_cache::ResolvedStreamCache,
    transformer::M3uTransformer,
};

/// Application state shared across handlers
pub struct AppState {
    pub config: Config,
    pub channels: ChannelCache,
    pub epg: EpgIngestor,
    pub resolver: Arc<dyn StreamResolver>,
    pub resolved_streams: ResolvedStreamCache<Vec<ResolvedStream>>,
    pub start_time: Instant,
}

/// React to catalog rebuilds: load the guide the playlist points at,
/// report channels without guide data, drop expired resolved streams.
fn spawn_catalog_listener(state: Arc<AppState>) {
    let mut events = state.channels.subscribe();

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(CacheEvent::Updated(status)) => {
                    tracing::info!(channels = status.channels, genres = status.genres, "Catalog updated");
                    routes::config::sync_epg(&state).await;

                    if state.channels.current_config().await.epg_enabled() {
                        if let Some(snapshot) = state.channels.snapshot().await {
                            state.epg.missing_epg(&snapshot.channels);
                        }
                    }

                    let purged = state.resolved_streams.purge_expired();
                    if purged > 0 {
                        tracing::debug!("Purged {} expired resolved streams", purged);
                    }
                }
                Ok(CacheEvent::RebuildFailed(reason)) => {
                    tracing::warn!("Catalog rebuild failed, still serving previous catalog: {}", reason);
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Catalog listener lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "livetv_guide_server=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // Load configuration
    let config = Config::from_env();
    let port = config.port;

    tracing::info!("Starting Live TV Guide Server v{}", env!("CARGO_PKG_VERSION"));

    // Playlist side
    let transformer = M3uTransformer::new(&config.user_agent, config.fetch_timeout_ms, config.max_retries)?;
    let channels = ChannelCache::new(
        Arc::new(transformer),
        Duration::from_secs(config.poll_interval_secs),
    );
    channels.initialize().await;

    // Guide side
    let timezone = parse_timezone(Some(&config.timezone_name));
    let fetcher = HttpFetcher::new(&config.user_agent, Duration::from_millis(config.fetch_timeout_ms))?;
    let epg = EpgIngestor::new(
        Arc::new(fetcher),
        timezone,
        parse_schedule(&config.epg_refresh_cron),
    );
    tracing::info!("EPG ingestor ready (timezone {})", timezone.name());

    let resolved_streams = ResolvedStreamCache::new(
        config.resolved_stream_capacity,
        Duration::from_millis(config.resolved_stream_ttl_ms),
    );

    let bootstrap = config.bootstrap.clone();
    let state = Arc::new(AppState {
        resolver: Arc::new(PassthroughResolver::new(config.user_agent.clone())),
        config,
        channels,
        epg,
        resolved_streams,
        start_time: Instant::now(),
    });

    spawn_catalog_listener(state.clone());

    if bootstrap != AddonConfig::default() {
        tracing::info!("Applying addon settings from environment");
        state.channels.apply_configuration(&bootstrap).await;

        let state = state.clone();
        tokio::spawn(async move {
            routes::config::sync_epg(&state).await;
        });
    }

    // Build router
    let app = routes::api_routes()
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state.clone());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    state.channels.cleanup();
    Ok(())
}
