//! In-process HLS origin used by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::State,
    http::{StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use hlsrelay_engine::{
    DownloadEngine, DownloadQueue, DownloadStore, EngineConfig, FetcherConfig, ManifestFetcher,
    RetryPolicy,
};
use parking_lot::Mutex;
use tokio::net::TcpListener;

pub const MEDIA: &str = "#EXTM3U\n\
#EXT-X-VERSION:3\n\
#EXT-X-TARGETDURATION:4\n\
#EXTINF:4.0,\n\
seg0.ts\n\
#EXTINF:4.0,\n\
seg1.ts\n\
#EXT-X-ENDLIST\n";

pub const LOCAL_MEDIA: &str = "#EXTM3U\n\
#EXT-X-VERSION:3\n\
#EXT-X-TARGETDURATION:4\n\
#EXTINF:4.0,\n\
seg_0.ts\n\
#EXTINF:4.0,\n\
seg_1.ts\n\
#EXT-X-ENDLIST\n";

const MASTER: &str = "#EXTM3U\n\
#EXT-X-STREAM-INF:BANDWIDTH=1280000,RESOLUTION=1280x720\n\
hd/index.m3u8\n";

pub const SEG0: &[u8] = b"segment-zero";
pub const SEG1: &[u8] = b"segment-one";

#[derive(Clone, Default)]
struct OriginState {
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

pub struct Origin {
    pub base: String,
    state: OriginState,
}

impl Origin {
    pub async fn spawn() -> Self {
        let state = OriginState::default();
        let app = Router::new().fallback(serve).with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://{addr}"),
            state,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn hits(&self, path: &str) -> usize {
        self.state.hits.lock().get(path).copied().unwrap_or(0)
    }
}

fn playlist(body: &'static str) -> Response {
    (
        [(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")],
        body,
    )
        .into_response()
}

fn segment(body: &'static [u8]) -> Response {
    ([(header::CONTENT_TYPE, "video/mp2t")], body).into_response()
}

async fn serve(State(state): State<OriginState>, uri: Uri) -> Response {
    let path = uri.path().to_string();
    let count = {
        let mut hits = state.hits.lock();
        let entry = hits.entry(path.clone()).or_insert(0);
        *entry += 1;
        *entry
    };

    match path.as_str() {
        "/vod/index.m3u8" | "/vod/hd/index.m3u8" | "/broken/index.m3u8"
        | "/flaky/index.m3u8" | "/slow/index.m3u8" => playlist(MEDIA),
        "/vod/master.m3u8" => playlist(MASTER),
        "/vod/seg0.ts" | "/vod/hd/seg0.ts" | "/broken/seg0.ts" => segment(SEG0),
        "/vod/seg1.ts" | "/vod/hd/seg1.ts" | "/flaky/seg1.ts" => segment(SEG1),
        "/flaky/seg0.ts" if count == 1 => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        "/flaky/seg0.ts" => segment(SEG0),
        "/slow/seg0.ts" | "/slow/seg1.ts" => {
            tokio::time::sleep(Duration::from_millis(150)).await;
            segment(SEG0)
        }
        "/loop/a.m3u8" => playlist("#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1\nb.m3u8\n"),
        "/loop/b.m3u8" => playlist("#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1\na.m3u8\n"),
        "/empty/index.m3u8" => playlist("#EXTM3U\n#EXT-X-ENDLIST\n"),
        "/blank/index.m3u8" => playlist(""),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

pub fn fetcher() -> ManifestFetcher {
    ManifestFetcher::new(&FetcherConfig::builder().with_system_proxy(false).build()).unwrap()
}

/// Engine with the default retry budget but no sleeping between attempts.
pub fn engine(root: &Path) -> DownloadEngine {
    DownloadEngine::new(
        fetcher(),
        EngineConfig::new(root.join("Downloads")).with_retry(RetryPolicy::immediate(2)),
    )
}

pub async fn queue(root: &Path) -> DownloadQueue {
    let store = DownloadStore::open(root.join("downloads.json"))
        .await
        .unwrap();
    DownloadQueue::new(store, engine(root))
}
