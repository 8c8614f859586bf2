//! Stateless rewriting proxy.
//!
//! Playlists come back with every reference pointing at the proxy again, so
//! nested variants, keys and segments are all fetched through it. Anything
//! else is streamed through untouched.

use reqwest::StatusCode;
use reqwest::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CACHE_CONTROL, HeaderMap, HeaderValue,
};
use tracing::{debug, warn};

use crate::config::LiveProxyConfig;
use crate::error::RelayError;
use crate::fetcher::{ManifestFetcher, UpstreamResponse};
use crate::manifest::ManifestDocument;
use crate::url_resolver;

pub const MANIFEST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
const FALLBACK_BINARY_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug)]
pub enum ProxyBody {
    /// Rewritten playlist text.
    Manifest(String),
    /// Upstream media, to be streamed as-is.
    Stream(UpstreamResponse),
    /// Plain-text error description.
    Message(String),
}

#[derive(Debug)]
pub struct ProxyReply {
    pub status: StatusCode,
    pub content_type: String,
    /// CORS and caching headers; the content type is carried separately.
    pub headers: HeaderMap,
    pub body: ProxyBody,
}

impl ProxyReply {
    /// Empty 200 answer for CORS preflight.
    pub fn preflight() -> Self {
        Self {
            status: StatusCode::OK,
            content_type: "text/plain; charset=utf-8".to_string(),
            headers: cors_headers(),
            body: ProxyBody::Message(String::new()),
        }
    }

    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8".to_string(),
            headers: cors_headers(),
            body: ProxyBody::Message(message.into()),
        }
    }

    /// Maps a fetch failure onto the status the client should see.
    pub fn from_error(err: &RelayError) -> Self {
        let status = match err {
            RelayError::InvalidUrl { .. } => StatusCode::BAD_REQUEST,
            RelayError::UpstreamStatus { status, .. } => *status,
            RelayError::UpstreamNetwork { .. } | RelayError::ManifestParse { .. } => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::error(status, err.to_string())
    }
}

fn cors_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, OPTIONS"),
    );
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
    headers
}

#[derive(Debug, Clone)]
pub struct LiveProxy {
    fetcher: ManifestFetcher,
    config: LiveProxyConfig,
}

impl LiveProxy {
    pub fn new(fetcher: ManifestFetcher, config: LiveProxyConfig) -> Self {
        Self { fetcher, config }
    }

    pub fn config(&self) -> &LiveProxyConfig {
        &self.config
    }

    /// Proxy URL for an absolute upstream URL.
    pub fn proxied_url(&self, absolute: &str) -> String {
        let separator = if self.config.proxy_base.contains('?') {
            '&'
        } else {
            '?'
        };
        format!(
            "{}{}url={}",
            self.config.proxy_base,
            separator,
            urlencoding::encode(absolute)
        )
    }

    /// Rewrites every segment line and key/map URI to go through the proxy.
    pub fn rewrite_manifest(&self, doc: &ManifestDocument) -> String {
        doc.rewrite(|ctx| self.proxied_url(ctx.url))
    }

    /// Answers one proxy request. Never fails: errors become status replies.
    pub async fn respond(&self, url: Option<&str>) -> ProxyReply {
        let Some(url) = url.map(str::trim).filter(|u| !u.is_empty()) else {
            return ProxyReply::error(StatusCode::BAD_REQUEST, "Missing URL");
        };
        match self.handle(url).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(url = %url, error = %err, "Proxy request failed");
                ProxyReply::from_error(&err)
            }
        }
    }

    pub async fn handle(&self, url: &str) -> Result<ProxyReply, RelayError> {
        if !url_resolver::is_http_url(url) {
            return Err(RelayError::invalid_url(url, "not an absolute http(s) URL"));
        }

        let upstream = self.fetcher.fetch(url).await?;
        let mut headers = cors_headers();

        if upstream.is_manifest() {
            let doc = upstream.into_manifest().await?;
            let body = self.rewrite_manifest(&doc);
            debug!(url = %url, references = doc.segment_count(), "Rewrote manifest");
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            return Ok(ProxyReply {
                status: StatusCode::OK,
                content_type: MANIFEST_CONTENT_TYPE.to_string(),
                headers,
                body: ProxyBody::Manifest(body),
            });
        }

        if let Ok(value) = HeaderValue::from_str(&self.config.binary_cache_control) {
            headers.insert(CACHE_CONTROL, value);
        }
        let content_type = upstream
            .content_type
            .clone()
            .unwrap_or_else(|| FALLBACK_BINARY_CONTENT_TYPE.to_string());
        Ok(ProxyReply {
            status: upstream.status,
            content_type,
            headers,
            body: ProxyBody::Stream(upstream),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetcherConfig;
    use axum::{Router, http::header, routing::get};
    use tokio::net::TcpListener;

    const MASTER: &str = "#EXTM3U\n\
#EXT-X-STREAM-INF:BANDWIDTH=1280000\n\
hd/index.m3u8\n";

    const MEDIA: &str = "#EXTM3U\n\
#EXT-X-TARGETDURATION:6\n\
#EXT-X-KEY:METHOD=AES-128,URI=\"../keys/k1.bin\"\n\
#EXTINF:6.0,\n\
seg0.ts\n\
#EXTINF:6.0,\n\
/abs/seg1.ts\n\
#EXTINF:6.0,\n\
https://other.example/seg2.ts?sig=a&b=c\n\
#EXT-X-ENDLIST\n";

    async fn spawn_upstream() -> String {
        let app = Router::new()
            .route("/vod/master.m3u8", get(|| async { MASTER }))
            .route("/vod/hd/index.m3u8", get(|| async { MEDIA }))
            .route(
                "/vod/hd/seg0.ts",
                get(|| async { ([(header::CONTENT_TYPE, "video/mp2t")], vec![0x47u8; 188]) }),
            )
            .route(
                "/private.m3u8",
                get(|| async { axum::http::StatusCode::FORBIDDEN }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn proxy() -> LiveProxy {
        let fetcher =
            ManifestFetcher::new(&FetcherConfig::builder().with_system_proxy(false).build())
                .unwrap();
        LiveProxy::new(fetcher, LiveProxyConfig::default())
    }

    fn proxied_targets(body: &str) -> Vec<String> {
        body.lines()
            .filter(|l| !l.trim().is_empty() && !l.starts_with('#'))
            .map(|l| {
                let encoded = l.strip_prefix("/proxy?url=").expect("proxied line");
                urlencoding::decode(encoded).unwrap().into_owned()
            })
            .collect()
    }

    #[test]
    fn proxied_url_encodes_like_encode_uri_component() {
        let proxy = proxy();
        assert_eq!(
            proxy.proxied_url("https://a.example/x y.ts?q=1&r=2"),
            "/proxy?url=https%3A%2F%2Fa.example%2Fx%20y.ts%3Fq%3D1%26r%3D2"
        );

        let with_query = LiveProxy::new(
            proxy.fetcher.clone(),
            LiveProxyConfig::default().with_proxy_base("/relay?mode=live"),
        );
        assert!(
            with_query
                .proxied_url("https://a.example/x.ts")
                .starts_with("/relay?mode=live&url=")
        );
    }

    #[test]
    fn key_uri_is_rewritten_inside_quotes() {
        let doc = ManifestDocument::parse(
            "#EXTM3U\n#EXT-X-KEY:METHOD=AES-128,URI=\"key.php\"\n#EXTINF:10,\nseg0.ts\n",
            "https://cdn.example/x/index.m3u8",
        )
        .unwrap();
        let body = proxy().rewrite_manifest(&doc);
        assert!(body.contains(
            "#EXT-X-KEY:METHOD=AES-128,URI=\"/proxy?url=https%3A%2F%2Fcdn.example%2Fx%2Fkey.php\""
        ));
        assert!(body.contains("\n/proxy?url=https%3A%2F%2Fcdn.example%2Fx%2Fseg0.ts\n"));
        assert!(body.ends_with('\n'));
    }

    #[tokio::test]
    async fn master_playlist_variants_point_back_at_proxy() {
        let base = spawn_upstream().await;
        let reply = proxy().respond(Some(&format!("{base}/vod/master.m3u8"))).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.content_type, MANIFEST_CONTENT_TYPE);
        let ProxyBody::Manifest(body) = reply.body else {
            panic!("expected manifest body");
        };
        assert_eq!(
            proxied_targets(&body),
            vec![format!("{base}/vod/hd/index.m3u8")]
        );
    }

    #[tokio::test]
    async fn every_reference_is_rewritten_exactly_once() {
        let base = spawn_upstream().await;
        let reply = proxy()
            .respond(Some(&format!("{base}/vod/hd/index.m3u8")))
            .await;
        assert_eq!(reply.headers.get(CACHE_CONTROL).unwrap(), "no-cache");
        assert_eq!(reply.headers.get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
        let ProxyBody::Manifest(body) = reply.body else {
            panic!("expected manifest body");
        };

        assert_eq!(
            proxied_targets(&body),
            vec![
                format!("{base}/vod/hd/seg0.ts"),
                format!("{base}/abs/seg1.ts"),
                "https://other.example/seg2.ts?sig=a&b=c".to_string(),
            ]
        );

        let key_line = body
            .lines()
            .find(|l| l.starts_with("#EXT-X-KEY"))
            .unwrap();
        let expected = format!(
            "URI=\"/proxy?url={}\"",
            urlencoding::encode(&format!("{base}/vod/keys/k1.bin"))
        );
        assert!(key_line.contains(&expected), "{key_line}");
        assert_eq!(body.lines().count(), MEDIA.lines().count());
    }

    #[tokio::test]
    async fn binary_is_passed_through() {
        let base = spawn_upstream().await;
        let reply = proxy().respond(Some(&format!("{base}/vod/hd/seg0.ts"))).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.content_type, "video/mp2t");
        assert_eq!(
            reply.headers.get(CACHE_CONTROL).unwrap(),
            "public, max-age=3600"
        );
        let ProxyBody::Stream(upstream) = reply.body else {
            panic!("expected streamed body");
        };
        let bytes = upstream.bytes().await.unwrap();
        assert_eq!(bytes.len(), 188);
        assert!(bytes.iter().all(|b| *b == 0x47));
    }

    #[tokio::test]
    async fn upstream_status_is_mirrored() {
        let base = spawn_upstream().await;
        let reply = proxy().respond(Some(&format!("{base}/private.m3u8"))).await;
        assert_eq!(reply.status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn missing_or_invalid_url_is_bad_request() {
        let proxy = proxy();
        assert_eq!(proxy.respond(None).await.status, StatusCode::BAD_REQUEST);
        assert_eq!(proxy.respond(Some("  ")).await.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            proxy.respond(Some("ftp://host/a.m3u8")).await.status,
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn transport_failure_is_bad_gateway() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let reply = proxy()
            .respond(Some(&format!("http://{addr}/index.m3u8")))
            .await;
        assert_eq!(reply.status, StatusCode::BAD_GATEWAY);
    }
}
