//! Single global download worker.
//!
//! `pending -> downloading -> done | error`. One worker drains the registry
//! one episode at a time; a second `start()` while it runs is a no-op.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::engine::{DownloadEngine, local_uri};
use crate::error::{RelayError, Result};
use crate::model::{ClaimedEpisode, EpisodePatch};
use crate::store::DownloadStore;
use crate::url_resolver;

pub const UNSUPPORTED_SOURCE: &str = "unsupported source";

#[derive(Debug, Clone)]
pub struct DownloadQueue {
    inner: Arc<QueueInner>,
}

#[derive(Debug)]
struct QueueInner {
    store: DownloadStore,
    engine: DownloadEngine,
    running: AtomicBool,
    token: CancellationToken,
}

/// Holds the single-flight flag; dropping it lets the next `start()` in.
struct RunningGuard(Arc<QueueInner>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

impl DownloadQueue {
    pub fn new(store: DownloadStore, engine: DownloadEngine) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                store,
                engine,
                running: AtomicBool::new(false),
                token: CancellationToken::new(),
            }),
        }
    }

    pub fn store(&self) -> &DownloadStore {
        &self.inner.store
    }

    pub fn engine(&self) -> &DownloadEngine {
        &self.inner.engine
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Spawns the worker unless one is already draining the registry.
    ///
    /// Returns the worker handle, or `None` when a worker was already running
    /// or the queue has been shut down.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if self.inner.token.is_cancelled() {
            return None;
        }
        let guard = QueueInner::try_acquire(&self.inner)?;
        let inner = self.inner.clone();
        Some(tokio::spawn(async move {
            inner.work(guard).await;
        }))
    }

    /// Stops the worker at the next cancellation point. The episode in flight
    /// stays `downloading` and is resumed by the next process.
    pub fn shutdown(&self) {
        self.inner.token.cancel();
    }
}

impl QueueInner {
    fn try_acquire(this: &Arc<Self>) -> Option<RunningGuard> {
        this.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningGuard(this.clone()))
    }

    async fn work(self: Arc<Self>, guard: RunningGuard) {
        info!("Download queue started");
        let mut guard = guard;
        loop {
            if let Err(e) = self.drain().await {
                error!(error = %e, "Download queue stopped; registry unavailable");
                return;
            }
            if self.token.is_cancelled() {
                info!("Download queue cancelled");
                return;
            }

            drop(guard);
            // Work added between the last claim and the release above would
            // otherwise wait for the next external start().
            match self.store.has_work().await {
                Ok(true) => match Self::try_acquire(&self) {
                    Some(next) => guard = next,
                    None => return,
                },
                Ok(false) => {
                    info!("Download queue idle");
                    return;
                }
                Err(e) => {
                    error!(error = %e, "Download queue stopped");
                    return;
                }
            }
        }
    }

    /// Claims and processes episodes until none are left. A claim that cannot
    /// be persisted ends the run instead of being retried.
    async fn drain(&self) -> Result<()> {
        while !self.token.is_cancelled() {
            match self.store.claim_next().await? {
                Some(claimed) => self.process(claimed).await,
                None => break,
            }
        }
        Ok(())
    }

    async fn process(&self, claimed: ClaimedEpisode) {
        let movie_slug = claimed.movie_slug.clone();
        let episode_slug = claimed.episode_slug.clone();

        let Some(source_url) = claimed.source_url.clone().filter(|u| is_supported_source(u)) else {
            warn!(movie = %movie_slug, episode = %episode_slug, "Episode has no usable source URL");
            self.persist(&claimed, EpisodePatch::failed(UNSUPPORTED_SOURCE))
                .await;
            return;
        };

        info!(movie = %movie_slug, episode = %episode_slug, url = %source_url, "Downloading episode");
        let result = self
            .engine
            .run(&movie_slug, &episode_slug, &source_url, &self.token, |progress| {
                let store = self.store.clone();
                let claimed = claimed.clone();
                async move {
                    if let Err(e) = store
                        .update_claimed(&claimed, EpisodePatch::progress(progress))
                        .await
                    {
                        warn!(
                            movie = %claimed.movie_slug,
                            episode = %claimed.episode_slug,
                            error = %e,
                            "Failed to persist progress"
                        );
                    }
                }
            })
            .await;

        match result {
            Ok(manifest) => {
                self.persist(&claimed, EpisodePatch::done(local_uri(&manifest)))
                    .await;
            }
            Err(RelayError::Cancelled) => {
                info!(movie = %movie_slug, episode = %episode_slug, "Download interrupted; will resume");
            }
            Err(e) => {
                error!(movie = %movie_slug, episode = %episode_slug, error = %e, "Download failed");
                self.persist(&claimed, EpisodePatch::failed(e.to_string()))
                    .await;
            }
        }
    }

    async fn persist(&self, claimed: &ClaimedEpisode, patch: EpisodePatch) {
        if let Err(e) = self.store.update_claimed(claimed, patch).await {
            error!(
                movie = %claimed.movie_slug,
                episode = %claimed.episode_slug,
                error = %e,
                "Failed to persist episode state"
            );
        }
    }
}

/// Plain http(s) playlists only; YouTube pages are not HLS sources.
fn is_supported_source(url: &str) -> bool {
    url_resolver::is_http_url(url) && !url.to_ascii_lowercase().contains("youtube")
}
