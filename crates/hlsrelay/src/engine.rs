//! Offline download of a whole HLS episode.
//!
//! Layout under the download root:
//!
//! ```text
//! {root}/{movie}/{episode}/seg_0.ts
//! {root}/{movie}/{episode}/seg_1.ts
//! {root}/{movie}/{episode}/index.m3u8
//! ```
//!
//! Segments are fetched strictly one after another. Each one is written to a
//! `.part` file first and renamed when complete, so a finished `seg_N` file is
//! always whole and can be trusted when a run is resumed.

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::EngineConfig;
use crate::error::{RelayError, Result};
use crate::fetcher::ManifestFetcher;
use crate::manifest::{ManifestDocument, UriKind};
use crate::retry::{RetryAction, retry_with_backoff};

pub const LOCAL_MANIFEST_NAME: &str = "index.m3u8";
const PART_SUFFIX: &str = "part";

#[derive(Debug, Clone)]
pub struct DownloadEngine {
    fetcher: ManifestFetcher,
    config: EngineConfig,
}

impl DownloadEngine {
    pub fn new(fetcher: ManifestFetcher, config: EngineConfig) -> Self {
        Self { fetcher, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn movie_dir(&self, movie_slug: &str) -> PathBuf {
        self.config
            .download_root
            .join(sanitize_component(movie_slug))
    }

    pub fn episode_dir(&self, movie_slug: &str, episode_slug: &str) -> PathBuf {
        self.movie_dir(movie_slug)
            .join(sanitize_component(episode_slug))
    }

    /// Downloads every segment of `manifest_url` and writes a local playlist.
    ///
    /// `on_progress` receives the rounded completion percentage after each
    /// segment; it never decreases and reports 100 once, after the local
    /// playlist is written. Returns the path of the local `index.m3u8`.
    pub async fn run<F, Fut>(
        &self,
        movie_slug: &str,
        episode_slug: &str,
        manifest_url: &str,
        token: &CancellationToken,
        mut on_progress: F,
    ) -> Result<PathBuf>
    where
        F: FnMut(u8) -> Fut,
        Fut: Future<Output = ()>,
    {
        let dir = self.episode_dir(movie_slug, episode_slug);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| RelayError::io("creating directory", &dir, e))?;

        let doc = self.resolve_media_playlist(manifest_url, token).await?;
        let segments: Vec<String> = doc.uri_lines().map(str::to_string).collect();
        if segments.is_empty() {
            return Err(RelayError::manifest(format!(
                "no segments in playlist {}",
                doc.base_url()
            )));
        }

        let total = segments.len();
        info!(
            movie = %movie_slug,
            episode = %episode_slug,
            segments = total,
            dir = %dir.display(),
            "Starting episode download"
        );

        let mut file_names = Vec::with_capacity(total);
        for (index, url) in segments.iter().enumerate() {
            if token.is_cancelled() {
                return Err(RelayError::Cancelled);
            }

            let file_name = segment_file_name(index, url);
            let target = dir.join(&file_name);

            if is_complete(&target).await {
                debug!(index, file = %target.display(), "Segment already on disk");
            } else {
                self.download_segment(url, &target, token)
                    .await
                    .map_err(|e| match e {
                        RelayError::Cancelled => e,
                        other => RelayError::segment(index, url.as_str(), other),
                    })?;
            }

            file_names.push(file_name);
            if index + 1 < total {
                on_progress(progress_percent(index + 1, total)).await;
            }
        }

        let local = doc.rewrite(|ctx| match (ctx.kind, ctx.index) {
            (UriKind::Segment, Some(index)) => file_names
                .get(index)
                .cloned()
                .unwrap_or_else(|| ctx.raw.to_string()),
            _ => ctx.raw.to_string(),
        });

        let manifest_path = dir.join(LOCAL_MANIFEST_NAME);
        write_atomic(&manifest_path, local.as_bytes()).await?;
        on_progress(100).await;
        info!(
            movie = %movie_slug,
            episode = %episode_slug,
            manifest = %manifest_path.display(),
            "Episode download complete"
        );
        Ok(manifest_path)
    }

    /// Follows master playlists down to a media playlist.
    ///
    /// Revisiting a URL or nesting deeper than `max_variant_depth` is an error.
    async fn resolve_media_playlist(
        &self,
        manifest_url: &str,
        token: &CancellationToken,
    ) -> Result<ManifestDocument> {
        let mut url = manifest_url.to_string();
        let mut visited = HashSet::new();

        for depth in 0..=self.config.max_variant_depth {
            if !visited.insert(url.clone()) {
                return Err(RelayError::manifest(format!(
                    "variant playlist loop at {url}"
                )));
            }

            let doc = self.fetch_manifest(&url, token).await?;
            match doc.variant_url() {
                Some(variant) => {
                    debug!(depth, from = %url, to = %variant, "Following variant playlist");
                    url = variant.to_string();
                }
                None => return Ok(doc),
            }
        }

        Err(RelayError::manifest(format!(
            "variant playlists nested deeper than {} levels",
            self.config.max_variant_depth
        )))
    }

    async fn fetch_manifest(&self, url: &str, token: &CancellationToken) -> Result<ManifestDocument> {
        retry_with_backoff(&self.config.retry, token, |_| async move {
            RetryAction::from(self.fetcher.fetch_manifest(url).await)
        })
        .await
    }

    async fn download_segment(&self, url: &str, target: &Path, token: &CancellationToken) -> Result<()> {
        let part = part_path(target);
        let result = retry_with_backoff(&self.config.retry, token, |attempt| {
            let part = part.clone();
            async move {
                if attempt > 0 {
                    debug!(attempt, url = %url, "Retrying segment");
                }
                RetryAction::from(self.fetch_to_file(url, &part).await)
            }
        })
        .await;

        match result {
            Ok(()) => tokio::fs::rename(&part, target)
                .await
                .map_err(|e| RelayError::io("renaming file", target, e)),
            Err(e) => {
                if let Err(remove) = tokio::fs::remove_file(&part).await
                    && remove.kind() != std::io::ErrorKind::NotFound
                {
                    warn!(file = %part.display(), error = %remove, "Failed to remove partial segment");
                }
                Err(e)
            }
        }
    }

    async fn fetch_to_file(&self, url: &str, part: &Path) -> Result<()> {
        let response = self.fetcher.fetch(url).await?;
        let mut file = tokio::fs::File::create(part)
            .await
            .map_err(|e| RelayError::io("creating file", part, e))?;

        let mut stream = std::pin::pin!(response.into_stream());
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|e| RelayError::io("writing file", part, e))?;
        }
        file.flush()
            .await
            .map_err(|e| RelayError::io("writing file", part, e))?;
        Ok(())
    }

    /// Removes every downloaded episode of a movie.
    pub async fn purge(&self, movie_slug: &str) -> Result<()> {
        remove_dir_if_exists(&self.movie_dir(movie_slug)).await
    }

    pub async fn purge_episode(&self, movie_slug: &str, episode_slug: &str) -> Result<()> {
        remove_dir_if_exists(&self.episode_dir(movie_slug, episode_slug)).await
    }
}

/// `seg_{index}.mp4` when the URL mentions `.mp4`, `seg_{index}.ts` otherwise.
pub fn segment_file_name(index: usize, url: &str) -> String {
    let ext = if url.contains(".mp4") { "mp4" } else { "ts" };
    format!("seg_{index}.{ext}")
}

/// Rounded percentage, held below 100 until the last segment lands.
pub fn progress_percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    if completed >= total {
        return 100;
    }
    let rounded = (completed * 200 + total) / (2 * total);
    rounded.min(99) as u8
}

/// `file://` URI for a local path, falling back to the plain path.
///
/// Relative paths are made absolute against the working directory first.
pub fn local_uri(path: &Path) -> String {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    Url::from_file_path(&absolute)
        .map(|u| u.to_string())
        .unwrap_or_else(|()| absolute.display().to_string())
}

/// Replaces characters that would escape the download root.
fn sanitize_component(slug: &str) -> String {
    let cleaned: String = slug
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

fn part_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".");
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

async fn is_complete(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let part = part_path(path);
    tokio::fs::write(&part, contents)
        .await
        .map_err(|e| RelayError::io("writing file", &part, e))?;
    tokio::fs::rename(&part, path)
        .await
        .map_err(|e| RelayError::io("renaming file", path, e))
}

async fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {
            info!(dir = %dir.display(), "Removed download folder");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RelayError::io("removing directory", dir, e)),
    }
}
