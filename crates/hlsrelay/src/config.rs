use std::{path::PathBuf, time::Duration};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::retry::RetryPolicy;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Upstreams commonly redirect once or twice to a CDN edge.
pub const DEFAULT_REDIRECT_LIMIT: usize = 10;

pub const DEFAULT_PROXY_BASE: &str = "/proxy";

pub const DEFAULT_MAX_VARIANT_DEPTH: usize = 3;

/// Options for the upstream HTTP client
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// User agent sent on every upstream request
    pub user_agent: String,

    /// Extra headers, merged over the defaults
    pub headers: HeaderMap,

    /// Overall timeout for a single request; zero disables it
    pub timeout: Duration,

    /// Time allowed to establish the connection
    pub connect_timeout: Duration,

    /// Longest silence allowed while reading a response; zero disables it
    pub read_timeout: Duration,

    /// Maximum number of redirects to follow
    pub redirect_limit: usize,

    /// Whether to honour system/env proxy settings
    pub use_system_proxy: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: FetcherConfig::get_default_headers(),
            timeout: Duration::from_secs(0),
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
            redirect_limit: DEFAULT_REDIRECT_LIMIT,
            use_system_proxy: true,
        }
    }
}

impl FetcherConfig {
    pub fn builder() -> FetcherConfigBuilder {
        FetcherConfigBuilder::new()
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));

        default_headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9"),
        );

        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );
        default_headers
    }
}

/// Builder for [`FetcherConfig`]
#[derive(Debug, Clone, Default)]
pub struct FetcherConfigBuilder {
    config: FetcherConfig,
}

impl FetcherConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Adds a header; invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.config.headers.insert(name, value);
        }
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in headers.iter() {
            self.config.headers.insert(name.clone(), value.clone());
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn with_redirect_limit(mut self, limit: usize) -> Self {
        self.config.redirect_limit = limit;
        self
    }

    pub fn with_system_proxy(mut self, use_system_proxy: bool) -> Self {
        self.config.use_system_proxy = use_system_proxy;
        self
    }

    pub fn build(self) -> FetcherConfig {
        self.config
    }
}

/// Options for the offline download engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding `{movie}/{episode}` folders
    pub download_root: PathBuf,

    /// Retry policy shared by manifest and segment fetches
    pub retry: RetryPolicy,

    /// How many nested variant playlists are followed before giving up
    pub max_variant_depth: usize,
}

impl EngineConfig {
    pub fn new(download_root: impl Into<PathBuf>) -> Self {
        Self {
            download_root: download_root.into(),
            retry: RetryPolicy::default(),
            max_variant_depth: DEFAULT_MAX_VARIANT_DEPTH,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_variant_depth(mut self, depth: usize) -> Self {
        self.max_variant_depth = depth;
        self
    }
}

/// Options for the live rewriting proxy
#[derive(Debug, Clone)]
pub struct LiveProxyConfig {
    /// Path (or absolute URL) that rewritten references point back to
    pub proxy_base: String,

    /// `Cache-Control` value for passthrough media
    pub binary_cache_control: String,
}

impl Default for LiveProxyConfig {
    fn default() -> Self {
        Self {
            proxy_base: DEFAULT_PROXY_BASE.to_owned(),
            binary_cache_control: "public, max-age=3600".to_owned(),
        }
    }
}

impl LiveProxyConfig {
    pub fn with_proxy_base(mut self, proxy_base: impl Into<String>) -> Self {
        self.proxy_base = proxy_base.into();
        self
    }
}
