//! Registry records, serialized in the format the mobile client already writes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    #[default]
    Pending,
    Downloading,
    Done,
    Error,
}

impl DownloadStatus {
    /// Still waiting for (or in the middle of) a worker pass.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Downloading)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadEpisode {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub status: DownloadStatus,
    #[serde(default)]
    pub progress: u8,
    /// Remote HLS manifest the episode is fetched from.
    #[serde(rename = "link_m3u8", default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    /// `file://` URI of the local manifest once done.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl DownloadEpisode {
    pub fn pending(
        slug: impl Into<String>,
        name: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            slug: slug.into(),
            name: name.into(),
            status: DownloadStatus::Pending,
            progress: 0,
            source_url: Some(source_url.into()),
            local_uri: None,
            error_message: None,
        }
    }

    pub fn apply(&mut self, patch: &EpisodePatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(progress) = patch.progress {
            self.progress = progress.min(100);
        }
        if let Some(local_uri) = &patch.local_uri {
            self.local_uri = Some(local_uri.clone());
        }
        if let Some(message) = &patch.error_message {
            self.error_message = Some(message.clone());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadItem {
    pub movie_slug: String,
    pub movie_name: String,
    #[serde(default)]
    pub poster_url: String,
    #[serde(default)]
    pub server_index: u32,
    #[serde(default)]
    pub episodes: Vec<DownloadEpisode>,
    /// Unix milliseconds; assigned by the store on insertion.
    #[serde(default)]
    pub added_at: i64,
}

impl DownloadItem {
    pub fn new(
        movie_slug: impl Into<String>,
        movie_name: impl Into<String>,
        server_index: u32,
        episodes: Vec<DownloadEpisode>,
    ) -> Self {
        Self {
            movie_slug: movie_slug.into(),
            movie_name: movie_name.into(),
            poster_url: String::new(),
            server_index,
            episodes,
            added_at: 0,
        }
    }

    pub fn with_poster_url(mut self, poster_url: impl Into<String>) -> Self {
        self.poster_url = poster_url.into();
        self
    }

    pub fn episode(&self, slug: &str) -> Option<&DownloadEpisode> {
        self.episodes.iter().find(|e| e.slug == slug)
    }

    pub fn episode_mut(&mut self, slug: &str) -> Option<&mut DownloadEpisode> {
        self.episodes.iter_mut().find(|e| e.slug == slug)
    }
}

/// Partial update for one episode; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodePatch {
    pub status: Option<DownloadStatus>,
    pub progress: Option<u8>,
    pub local_uri: Option<String>,
    pub error_message: Option<String>,
}

impl EpisodePatch {
    pub fn progress(progress: u8) -> Self {
        Self {
            status: Some(DownloadStatus::Downloading),
            progress: Some(progress),
            ..Self::default()
        }
    }

    pub fn done(local_uri: impl Into<String>) -> Self {
        Self {
            status: Some(DownloadStatus::Done),
            progress: Some(100),
            local_uri: Some(local_uri.into()),
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(DownloadStatus::Error),
            error_message: Some(message.into()),
            ..Self::default()
        }
    }
}

/// An episode handed to the queue worker by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedEpisode {
    pub movie_slug: String,
    pub server_index: u32,
    pub episode_slug: String,
    pub source_url: Option<String>,
}
