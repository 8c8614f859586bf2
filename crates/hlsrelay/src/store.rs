//! Durable download registry.
//!
//! The registry is owned by a single actor task. Every mutation is applied in
//! memory and then flushed as one JSON document (temp file + rename), so
//! concurrent callers never interleave read-modify-write cycles.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{RelayError, Result};
use crate::model::{ClaimedEpisode, DownloadItem, DownloadStatus, EpisodePatch};

const MAILBOX_CAPACITY: usize = 64;

/// In-memory registry with the mutation rules; no I/O.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    items: Vec<DownloadItem>,
}

impl Registry {
    pub fn from_items(items: Vec<DownloadItem>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[DownloadItem] {
        &self.items
    }

    /// Merges new episode slugs into an existing `(movie, server)` entry or
    /// prepends a new one stamped with `added_at`.
    pub fn add(&mut self, mut item: DownloadItem, added_at: i64) {
        let existing = self
            .items
            .iter_mut()
            .find(|m| m.movie_slug == item.movie_slug && m.server_index == item.server_index);

        match existing {
            Some(existing) => {
                for episode in item.episodes {
                    if existing.episode(&episode.slug).is_none() {
                        existing.episodes.push(episode);
                    }
                }
            }
            None => {
                let mut seen = std::collections::HashSet::new();
                item.episodes.retain(|e| seen.insert(e.slug.clone()));
                item.added_at = added_at;
                self.items.insert(0, item);
            }
        }
    }

    /// Returns whether anything changed; unknown targets are ignored.
    ///
    /// A movie can be queued from several servers; the first item of that
    /// movie holding `episode_slug` is updated.
    pub fn update_episode(&mut self, movie_slug: &str, episode_slug: &str, patch: &EpisodePatch) -> bool {
        self.apply_patch(movie_slug, None, episode_slug, patch)
    }

    /// Updates the exact episode handed out by [`Registry::claim_next`].
    pub fn update_claimed(&mut self, claimed: &ClaimedEpisode, patch: &EpisodePatch) -> bool {
        self.apply_patch(
            &claimed.movie_slug,
            Some(claimed.server_index),
            &claimed.episode_slug,
            patch,
        )
    }

    fn apply_patch(
        &mut self,
        movie_slug: &str,
        server_index: Option<u32>,
        episode_slug: &str,
        patch: &EpisodePatch,
    ) -> bool {
        let Some((item_idx, ep_idx)) = self.locate(movie_slug, server_index, episode_slug) else {
            return false;
        };
        self.items[item_idx].episodes[ep_idx].apply(patch);
        true
    }

    pub fn remove(&mut self, movie_slug: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|m| m.movie_slug != movie_slug);
        self.items.len() != before
    }

    /// Drops one episode and the owning item once it has none left. Items of
    /// the same movie from other servers are untouched.
    pub fn remove_episode(&mut self, movie_slug: &str, episode_slug: &str) -> bool {
        let Some((item_idx, ep_idx)) = self.locate(movie_slug, None, episode_slug) else {
            return false;
        };
        self.items[item_idx].episodes.remove(ep_idx);
        if self.items[item_idx].episodes.is_empty() {
            self.items.remove(item_idx);
        }
        true
    }

    pub fn local_play_uri(&self, movie_slug: &str, episode_slug: &str) -> Option<String> {
        self.items
            .iter()
            .filter(|m| m.movie_slug == movie_slug)
            .filter_map(|m| m.episode(episode_slug))
            .find_map(|episode| match (episode.status, &episode.local_uri) {
                (DownloadStatus::Done, Some(uri)) if !uri.is_empty() => Some(uri.clone()),
                _ => None,
            })
    }

    /// Position of `episode_slug` among the items of `movie_slug`, optionally
    /// limited to one server.
    fn locate(
        &self,
        movie_slug: &str,
        server_index: Option<u32>,
        episode_slug: &str,
    ) -> Option<(usize, usize)> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, m)| {
                m.movie_slug == movie_slug && server_index.is_none_or(|s| m.server_index == s)
            })
            .find_map(|(i, m)| {
                m.episodes
                    .iter()
                    .position(|e| e.slug == episode_slug)
                    .map(|j| (i, j))
            })
    }

    pub fn has_work(&self) -> bool {
        self.items
            .iter()
            .flat_map(|m| m.episodes.iter())
            .any(|e| e.status.is_active())
    }

    /// Picks the next episode for the worker and marks it `downloading` at 0%.
    ///
    /// An episode already `downloading` (left by an interrupted run) wins over
    /// `pending` ones so at most one episode is ever in flight.
    pub fn claim_next(&mut self) -> Option<ClaimedEpisode> {
        let position = self
            .find_position(DownloadStatus::Downloading)
            .or_else(|| self.find_position(DownloadStatus::Pending))?;
        let (item_idx, ep_idx) = position;
        let item = &mut self.items[item_idx];
        let episode = &mut item.episodes[ep_idx];
        episode.status = DownloadStatus::Downloading;
        episode.progress = 0;
        episode.error_message = None;
        Some(ClaimedEpisode {
            movie_slug: item.movie_slug.clone(),
            server_index: item.server_index,
            episode_slug: episode.slug.clone(),
            source_url: episode.source_url.clone(),
        })
    }

    fn find_position(&self, status: DownloadStatus) -> Option<(usize, usize)> {
        self.items.iter().enumerate().find_map(|(i, item)| {
            item.episodes
                .iter()
                .position(|e| e.status == status)
                .map(|j| (i, j))
        })
    }
}

enum StoreCommand {
    GetAll {
        reply: oneshot::Sender<Vec<DownloadItem>>,
    },
    Add {
        item: DownloadItem,
        reply: oneshot::Sender<Result<()>>,
    },
    UpdateEpisode {
        movie_slug: String,
        episode_slug: String,
        patch: EpisodePatch,
        reply: oneshot::Sender<Result<()>>,
    },
    UpdateClaimed {
        claimed: ClaimedEpisode,
        patch: EpisodePatch,
        reply: oneshot::Sender<Result<()>>,
    },
    Remove {
        movie_slug: String,
        reply: oneshot::Sender<Result<()>>,
    },
    RemoveEpisode {
        movie_slug: String,
        episode_slug: String,
        reply: oneshot::Sender<Result<()>>,
    },
    LocalPlayUri {
        movie_slug: String,
        episode_slug: String,
        reply: oneshot::Sender<Option<String>>,
    },
    ClaimNext {
        reply: oneshot::Sender<Result<Option<ClaimedEpisode>>>,
    },
    HasWork {
        reply: oneshot::Sender<bool>,
    },
}

/// Handle to the registry actor. Cheap to clone; the actor stops when the
/// last handle is dropped.
#[derive(Debug, Clone)]
pub struct DownloadStore {
    sender: mpsc::Sender<StoreCommand>,
    path: PathBuf,
}

impl std::fmt::Debug for StoreCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::GetAll { .. } => "GetAll",
            Self::Add { .. } => "Add",
            Self::UpdateEpisode { .. } => "UpdateEpisode",
            Self::UpdateClaimed { .. } => "UpdateClaimed",
            Self::Remove { .. } => "Remove",
            Self::RemoveEpisode { .. } => "RemoveEpisode",
            Self::LocalPlayUri { .. } => "LocalPlayUri",
            Self::ClaimNext { .. } => "ClaimNext",
            Self::HasWork { .. } => "HasWork",
        };
        f.write_str(name)
    }
}

impl DownloadStore {
    /// Loads the registry at `path` and spawns its actor.
    ///
    /// A missing file is an empty registry; an unreadable one is logged and
    /// replaced on the next write.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let registry = load(&path).await?;
        info!(
            path = %path.display(),
            items = registry.items().len(),
            "Download registry loaded"
        );

        let (sender, receiver) = mpsc::channel(MAILBOX_CAPACITY);
        let actor = StoreActor {
            registry,
            path: path.clone(),
            receiver,
        };
        tokio::spawn(actor.run());

        Ok(Self { sender, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> StoreCommand,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(build(reply))
            .await
            .map_err(|_| RelayError::store("registry actor has stopped"))?;
        response
            .await
            .map_err(|_| RelayError::store("registry actor dropped the reply"))
    }

    pub async fn get_all(&self) -> Result<Vec<DownloadItem>> {
        self.request(|reply| StoreCommand::GetAll { reply }).await
    }

    pub async fn add(&self, item: DownloadItem) -> Result<()> {
        self.request(|reply| StoreCommand::Add { item, reply })
            .await?
    }

    pub async fn update_episode(
        &self,
        movie_slug: &str,
        episode_slug: &str,
        patch: EpisodePatch,
    ) -> Result<()> {
        self.request(|reply| StoreCommand::UpdateEpisode {
            movie_slug: movie_slug.to_string(),
            episode_slug: episode_slug.to_string(),
            patch,
            reply,
        })
        .await?
    }

    /// Updates the episode a worker claimed, pinned to its server.
    pub async fn update_claimed(&self, claimed: &ClaimedEpisode, patch: EpisodePatch) -> Result<()> {
        self.request(|reply| StoreCommand::UpdateClaimed {
            claimed: claimed.clone(),
            patch,
            reply,
        })
        .await?
    }

    pub async fn remove(&self, movie_slug: &str) -> Result<()> {
        self.request(|reply| StoreCommand::Remove {
            movie_slug: movie_slug.to_string(),
            reply,
        })
        .await?
    }

    pub async fn remove_episode(&self, movie_slug: &str, episode_slug: &str) -> Result<()> {
        self.request(|reply| StoreCommand::RemoveEpisode {
            movie_slug: movie_slug.to_string(),
            episode_slug: episode_slug.to_string(),
            reply,
        })
        .await?
    }

    pub async fn get_local_play_uri(
        &self,
        movie_slug: &str,
        episode_slug: &str,
    ) -> Result<Option<String>> {
        self.request(|reply| StoreCommand::LocalPlayUri {
            movie_slug: movie_slug.to_string(),
            episode_slug: episode_slug.to_string(),
            reply,
        })
        .await
    }

    pub async fn claim_next(&self) -> Result<Option<ClaimedEpisode>> {
        self.request(|reply| StoreCommand::ClaimNext { reply })
            .await?
    }

    pub async fn has_work(&self) -> Result<bool> {
        self.request(|reply| StoreCommand::HasWork { reply }).await
    }
}

struct StoreActor {
    registry: Registry,
    path: PathBuf,
    receiver: mpsc::Receiver<StoreCommand>,
}

impl StoreActor {
    async fn run(mut self) {
        while let Some(command) = self.receiver.recv().await {
            debug!(?command, "Registry command");
            match command {
                StoreCommand::GetAll { reply } => {
                    let _ = reply.send(self.registry.items().to_vec());
                }
                StoreCommand::Add { item, reply } => {
                    self.registry.add(item, Utc::now().timestamp_millis());
                    let _ = reply.send(self.flush().await);
                }
                StoreCommand::UpdateEpisode {
                    movie_slug,
                    episode_slug,
                    patch,
                    reply,
                } => {
                    let result = if self.registry.update_episode(&movie_slug, &episode_slug, &patch) {
                        self.flush().await
                    } else {
                        debug!(movie = %movie_slug, episode = %episode_slug, "Update for unknown episode ignored");
                        Ok(())
                    };
                    let _ = reply.send(result);
                }
                StoreCommand::UpdateClaimed {
                    claimed,
                    patch,
                    reply,
                } => {
                    let result = if self.registry.update_claimed(&claimed, &patch) {
                        self.flush().await
                    } else {
                        debug!(
                            movie = %claimed.movie_slug,
                            server = claimed.server_index,
                            episode = %claimed.episode_slug,
                            "Update for removed episode ignored"
                        );
                        Ok(())
                    };
                    let _ = reply.send(result);
                }
                StoreCommand::Remove { movie_slug, reply } => {
                    let result = if self.registry.remove(&movie_slug) {
                        self.flush().await
                    } else {
                        Ok(())
                    };
                    let _ = reply.send(result);
                }
                StoreCommand::RemoveEpisode {
                    movie_slug,
                    episode_slug,
                    reply,
                } => {
                    let result = if self.registry.remove_episode(&movie_slug, &episode_slug) {
                        self.flush().await
                    } else {
                        Ok(())
                    };
                    let _ = reply.send(result);
                }
                StoreCommand::LocalPlayUri {
                    movie_slug,
                    episode_slug,
                    reply,
                } => {
                    let _ = reply.send(self.registry.local_play_uri(&movie_slug, &episode_slug));
                }
                StoreCommand::ClaimNext { reply } => {
                    let result = match self.registry.claim_next() {
                        Some(claimed) => self.flush().await.map(|()| Some(claimed)),
                        None => Ok(None),
                    };
                    let _ = reply.send(result);
                }
                StoreCommand::HasWork { reply } => {
                    let _ = reply.send(self.registry.has_work());
                }
            }
        }
        debug!(path = %self.path.display(), "Registry actor stopped");
    }

    async fn flush(&self) -> Result<()> {
        let json = serde_json::to_vec_pretty(self.registry.items())
            .map_err(|e| RelayError::store(format!("failed to serialize registry: {e}")))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RelayError::io("creating directory", parent, e))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| RelayError::io("writing file", &tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| RelayError::io("renaming file", &self.path, e))?;
        Ok(())
    }
}

async fn load(path: &Path) -> Result<Registry> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Registry::default()),
        Err(e) => return Err(RelayError::io("reading file", path, e)),
    };

    match serde_json::from_slice::<Vec<DownloadItem>>(&bytes) {
        Ok(items) => Ok(Registry::from_items(items)),
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Download registry is unreadable; starting empty"
            );
            Ok(Registry::default())
        }
    }
}
