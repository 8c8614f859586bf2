//! Turns command-line arguments into engine configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use hlsrelay_engine::{EngineConfig, FetcherConfig, LiveProxyConfig, RetryPolicy};

use crate::cli::HttpArgs;
use crate::utils::parse_headers;

/// Folder under the data directory that holds `{movie}/{episode}` downloads.
pub const DOWNLOADS_DIR: &str = "Downloads";
/// Registry file name under the data directory.
pub const REGISTRY_FILE: &str = "downloads.json";

pub fn downloads_root(data_dir: &Path) -> PathBuf {
    data_dir.join(DOWNLOADS_DIR)
}

pub fn registry_path(data_dir: &Path) -> PathBuf {
    data_dir.join(REGISTRY_FILE)
}

pub fn fetcher_config(http: &HttpArgs) -> FetcherConfig {
    let mut builder = FetcherConfig::builder()
        .with_headers(parse_headers(&http.headers))
        .with_timeout(Duration::from_secs(http.timeout))
        .with_connect_timeout(Duration::from_secs(http.connect_timeout))
        .with_read_timeout(Duration::from_secs(http.read_timeout))
        .with_system_proxy(!http.no_proxy);

    if let Some(user_agent) = &http.user_agent {
        builder = builder.with_user_agent(user_agent.clone());
    }

    builder.build()
}

pub fn retry_policy(http: &HttpArgs) -> RetryPolicy {
    RetryPolicy::default()
        .with_max_retries(http.retries)
        .with_base_delay(Duration::from_millis(http.retry_delay_ms))
}

pub fn engine_config(http: &HttpArgs, data_dir: &Path) -> EngineConfig {
    EngineConfig::new(downloads_root(data_dir)).with_retry(retry_policy(http))
}

pub fn proxy_config(proxy_base: &str) -> LiveProxyConfig {
    LiveProxyConfig::default().with_proxy_base(proxy_base)
}
