//! HLS manifest relay engine.
//!
//! Two consumers share the same parsing and resolution code:
//!
//! * [`LiveProxy`] fetches a playlist on demand and rewrites every reference so
//!   playback goes back through the proxy, streaming media untouched.
//! * [`DownloadEngine`] fetches a whole episode to disk and writes a playlist
//!   pointing at the local files. [`DownloadQueue`] drives it from the durable
//!   [`DownloadStore`] registry.

pub mod config;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod live_proxy;
pub mod manifest;
pub mod model;
pub mod queue;
pub mod retry;
pub mod store;
pub mod url_resolver;

pub use config::{EngineConfig, FetcherConfig, FetcherConfigBuilder, LiveProxyConfig};
pub use engine::{DownloadEngine, local_uri};
pub use error::{RelayError, Result};
pub use fetcher::{ManifestFetcher, ResourceKind, UpstreamResponse};
pub use live_proxy::{LiveProxy, ProxyBody, ProxyReply};
pub use manifest::{ManifestDocument, ManifestLine, RewriteContext, UriKind};
pub use model::{ClaimedEpisode, DownloadEpisode, DownloadItem, DownloadStatus, EpisodePatch};
pub use queue::DownloadQueue;
pub use retry::{RetryAction, RetryPolicy, retry_with_backoff};
pub use store::{DownloadStore, Registry};
