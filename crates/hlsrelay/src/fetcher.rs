// Upstream fetcher: one GET per call, spoofed browser headers, no retries.

use std::sync::OnceLock;

use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use reqwest::header::{CONTENT_TYPE, HeaderValue, ORIGIN, REFERER};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::config::FetcherConfig;
use crate::error::{RelayError, Result};
use crate::manifest::ManifestDocument;
use crate::url_resolver;

/// How the body of an upstream response should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Manifest,
    Binary,
}

impl ResourceKind {
    /// Playlist when either URL path ends in `.m3u8` or the content type says `mpegurl`.
    pub fn detect(requested_url: &str, final_url: &str, content_type: Option<&str>) -> Self {
        let mpegurl = content_type
            .map(|ct| ct.to_ascii_lowercase().contains("mpegurl"))
            .unwrap_or(false);
        if mpegurl
            || url_resolver::is_playlist_url(final_url)
            || url_resolver::is_playlist_url(requested_url)
        {
            ResourceKind::Manifest
        } else {
            ResourceKind::Binary
        }
    }
}

/// A successful (2xx) upstream response whose body has not been read yet.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub requested_url: String,
    /// URL after redirects; relative references resolve against this.
    pub final_url: String,
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub kind: ResourceKind,
    response: reqwest::Response,
}

impl UpstreamResponse {
    pub fn is_manifest(&self) -> bool {
        self.kind == ResourceKind::Manifest
    }

    pub async fn bytes(self) -> Result<Bytes> {
        let url = self.final_url;
        self.response
            .bytes()
            .await
            .map_err(|e| RelayError::upstream_network(url, e))
    }

    pub async fn text(self) -> Result<String> {
        let url = self.final_url;
        self.response
            .text()
            .await
            .map_err(|e| RelayError::upstream_network(url, e))
    }

    /// Reads the body and parses it against the final URL.
    pub async fn into_manifest(self) -> Result<ManifestDocument> {
        let base = self.final_url.clone();
        let text = self.text().await?;
        ManifestDocument::parse(&text, &base)
    }

    /// Body as a chunk stream, for passthrough without buffering.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes>> + Send + 'static {
        let url = self.final_url;
        self.response
            .bytes_stream()
            .map_err(move |e| RelayError::upstream_network(url.clone(), e))
    }
}

/// Installs the process-wide rustls crypto provider once.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &FetcherConfig) -> Result<Client> {
    install_rustls_provider();

    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(5)
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .redirect(reqwest::redirect::Policy::limited(config.redirect_limit));

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if !config.read_timeout.is_zero() {
        client_builder = client_builder.read_timeout(config.read_timeout);
    }

    if !config.use_system_proxy {
        client_builder = client_builder.no_proxy();
    }

    client_builder
        .build()
        .map_err(|e| RelayError::Client(e.to_string()))
}

/// Shared upstream client. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ManifestFetcher {
    client: Client,
}

impl ManifestFetcher {
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        Ok(Self {
            client: create_client(config)?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Issues a GET for `url` with `Referer`/`Origin` set to the URL's own origin.
    ///
    /// Non-2xx responses become [`RelayError::UpstreamStatus`].
    pub async fn fetch(&self, url: &str) -> Result<UpstreamResponse> {
        if !url_resolver::is_http_url(url) {
            return Err(RelayError::invalid_url(url, "not an absolute http(s) URL"));
        }

        let mut request = self.client.get(url);
        if let Some(origin) = url_resolver::origin_of(url) {
            if let Ok(referer) = HeaderValue::from_str(&format!("{origin}/")) {
                request = request.header(REFERER, referer);
            }
            if let Ok(origin) = HeaderValue::from_str(&origin) {
                request = request.header(ORIGIN, origin);
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| RelayError::upstream_network(url, e))?;

        let status = response.status();
        let final_url = response.url().to_string();
        if !status.is_success() {
            warn!(url = %url, status = %status, "Upstream returned non-success status");
            return Err(RelayError::upstream_status(status, url));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let kind = ResourceKind::detect(url, &final_url, content_type.as_deref());
        debug!(url = %url, final_url = %final_url, ?kind, "Fetched upstream resource");

        Ok(UpstreamResponse {
            requested_url: url.to_string(),
            final_url,
            status,
            content_type,
            kind,
            response,
        })
    }

    /// Fetches and parses a playlist in one step.
    pub async fn fetch_manifest(&self, url: &str) -> Result<ManifestDocument> {
        self.fetch(url).await?.into_manifest().await
    }
}
