//! HTTP server: live proxy, downloads API and health check.

pub mod downloads;
pub mod error;
pub mod health;
pub mod proxy;

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::Request;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{Span, info, warn};

use hlsrelay_engine::{DownloadEngine, DownloadQueue, DownloadStore, LiveProxy, ManifestFetcher};

use crate::cli::{HttpArgs, ServeArgs};
use crate::config;
use crate::error::AppError;

/// Route the proxy is mounted on. `--proxy-base` only changes the prefix
/// written into rewritten playlists, e.g. when behind a reverse proxy.
pub const PROXY_ROUTE: &str = "/proxy";

#[derive(Clone)]
pub struct AppState {
    pub start_time: Instant,
    pub proxy: LiveProxy,
    pub queue: DownloadQueue,
}

impl AppState {
    pub fn new(proxy: LiveProxy, queue: DownloadQueue) -> Self {
        Self {
            start_time: Instant::now(),
            proxy,
            queue,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest(PROXY_ROUTE, proxy::router())
        .nest("/api/downloads", downloads::router())
        .nest("/health", health::router())
        .with_state(state)
}

fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    create_router(state).layer(cors).layer(
        TraceLayer::new_for_http()
            .make_span_with(|req: &Request| {
                if req.uri().path().starts_with("/health") {
                    Span::none()
                } else {
                    tracing::info_span!("request", method = %req.method(), uri = %req.uri())
                }
            })
            .on_response(
                |res: &axum::http::Response<_>, latency: Duration, span: &Span| {
                    if span.is_disabled() {
                        return;
                    }
                    tracing::debug!(status = %res.status(), latency_ms = latency.as_millis(), "finished");
                },
            ),
    )
}

pub async fn serve(args: ServeArgs, http: &HttpArgs) -> Result<(), AppError> {
    let addr: SocketAddr = args
        .bind
        .parse()
        .map_err(|e| AppError::InvalidInput(format!("Invalid bind address '{}': {e}", args.bind)))?;

    let fetcher = ManifestFetcher::new(&config::fetcher_config(http))?;
    let proxy = LiveProxy::new(fetcher.clone(), config::proxy_config(&args.proxy_base));
    let engine = DownloadEngine::new(fetcher, config::engine_config(http, &args.data_dir));
    let store = DownloadStore::open(config::registry_path(&args.data_dir)).await?;
    let queue = DownloadQueue::new(store, engine);

    if args.no_resume {
        info!("Queue resume disabled; waiting for a start request");
    } else if queue.start().is_some() {
        info!("Resuming download queue");
    }

    let state = AppState::new(proxy, queue.clone());
    let router = build_router(state);
    let listener = TcpListener::bind(addr).await?;
    info!(
        data_dir = %args.data_dir.display(),
        proxy_base = %args.proxy_base,
        "Listening on http://{}",
        addr
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
        }
        signal.cancel();
    });

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            queue.shutdown();
            info!("Server shutting down...");
        })
        .await
        .map_err(|e| AppError::Server(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
pub(crate) async fn test_state(root: &std::path::Path) -> AppState {
    use hlsrelay_engine::{EngineConfig, FetcherConfig, LiveProxyConfig, RetryPolicy};

    let fetcher =
        ManifestFetcher::new(&FetcherConfig::builder().with_system_proxy(false).build()).unwrap();
    let proxy = LiveProxy::new(fetcher.clone(), LiveProxyConfig::default());
    let engine = DownloadEngine::new(
        fetcher,
        EngineConfig::new(config::downloads_root(root)).with_retry(RetryPolicy::immediate(0)),
    );
    let store = DownloadStore::open(config::registry_path(root)).await.unwrap();
    AppState::new(proxy, DownloadQueue::new(store, engine))
}
