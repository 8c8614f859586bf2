use std::path::{Path, PathBuf};

use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("upstream request for {url} failed with HTTP {status}")]
    UpstreamStatus { status: StatusCode, url: String },

    #[error("upstream request for {url} failed: {source}")]
    UpstreamNetwork {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("manifest error: {reason}")]
    ManifestParse { reason: String },

    #[error("segment {index} ({url}) failed: {source}")]
    SegmentDownload {
        index: usize,
        url: String,
        #[source]
        source: Box<RelayError>,
    },

    #[error("{op} `{}` failed: {source}", .path.display())]
    Filesystem {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("registry error: {reason}")]
    Store { reason: String },

    #[error("HTTP client error: {0}")]
    Client(String),
}

impl RelayError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn upstream_status(status: StatusCode, url: impl Into<String>) -> Self {
        Self::UpstreamStatus {
            status,
            url: url.into(),
        }
    }

    pub fn upstream_network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::UpstreamNetwork {
            url: url.into(),
            source,
        }
    }

    pub fn manifest(reason: impl Into<String>) -> Self {
        Self::ManifestParse {
            reason: reason.into(),
        }
    }

    pub fn segment(index: usize, url: impl Into<String>, source: RelayError) -> Self {
        Self::SegmentDownload {
            index,
            url: url.into(),
            source: Box::new(source),
        }
    }

    pub fn io(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Filesystem {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn store(reason: impl Into<String>) -> Self {
        Self::Store {
            reason: reason.into(),
        }
    }

    /// Upstream status code, when the failure came from a non-2xx response.
    pub fn upstream_status_code(&self) -> Option<StatusCode> {
        match self {
            Self::UpstreamStatus { status, .. } => Some(*status),
            Self::SegmentDownload { source, .. } => source.upstream_status_code(),
            _ => None,
        }
    }

    /// Fetch failures are retried regardless of status; the caller's retry
    /// budget is what bounds them. Parse, filesystem and registry failures
    /// are fatal on the first occurrence.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::UpstreamStatus { .. } | Self::UpstreamNetwork { .. } => true,
            Self::SegmentDownload { source, .. } => source.is_retryable(),
            Self::Cancelled
            | Self::InvalidUrl { .. }
            | Self::ManifestParse { .. }
            | Self::Filesystem { .. }
            | Self::Store { .. }
            | Self::Client(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
