//! End-to-end download engine tests against an in-process origin.

mod common;

use std::sync::Arc;

use common::{LOCAL_MEDIA, Origin, SEG0, SEG1};
use hlsrelay_engine::{DownloadEngine, EngineConfig, RelayError, RetryPolicy};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

fn recorder() -> (Arc<Mutex<Vec<u8>>>, impl FnMut(u8) -> std::future::Ready<()>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |p| {
        sink.lock().push(p);
        std::future::ready(())
    })
}

#[tokio::test]
async fn downloads_segments_and_writes_local_manifest() {
    let origin = Origin::spawn().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = common::engine(dir.path());
    let (progress, on_progress) = recorder();

    let manifest = engine
        .run(
            "movie-a",
            "tap-1",
            &origin.url("/vod/index.m3u8"),
            &CancellationToken::new(),
            on_progress,
        )
        .await
        .unwrap();

    let episode_dir = dir.path().join("Downloads").join("movie-a").join("tap-1");
    assert_eq!(manifest, episode_dir.join("index.m3u8"));
    assert_eq!(std::fs::read(episode_dir.join("seg_0.ts")).unwrap(), SEG0);
    assert_eq!(std::fs::read(episode_dir.join("seg_1.ts")).unwrap(), SEG1);
    assert_eq!(std::fs::read_to_string(&manifest).unwrap(), LOCAL_MEDIA);
    assert_eq!(*progress.lock(), vec![50, 100]);
}

#[tokio::test]
async fn failing_segment_aborts_after_retries() {
    let origin = Origin::spawn().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = common::engine(dir.path());
    let (progress, on_progress) = recorder();

    let err = engine
        .run(
            "movie-b",
            "tap-1",
            &origin.url("/broken/index.m3u8"),
            &CancellationToken::new(),
            on_progress,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RelayError::SegmentDownload { index: 1, .. }));
    assert!(err.to_string().contains("404"), "{err}");
    assert_eq!(origin.hits("/broken/seg1.ts"), 3);

    let episode_dir = dir.path().join("Downloads").join("movie-b").join("tap-1");
    assert!(episode_dir.join("seg_0.ts").exists());
    assert!(!episode_dir.join("seg_1.ts").exists());
    assert!(!episode_dir.join("seg_1.ts.part").exists());
    assert!(!episode_dir.join("index.m3u8").exists());
    assert_eq!(*progress.lock(), vec![50]);
}

#[tokio::test]
async fn transient_failure_is_retried() {
    let origin = Origin::spawn().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = common::engine(dir.path());

    engine
        .run(
            "movie-c",
            "tap-1",
            &origin.url("/flaky/index.m3u8"),
            &CancellationToken::new(),
            |_| async {},
        )
        .await
        .unwrap();
    assert_eq!(origin.hits("/flaky/seg0.ts"), 2);
}

#[tokio::test]
async fn follows_master_playlist_to_variant() {
    let origin = Origin::spawn().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = common::engine(dir.path());

    let manifest = engine
        .run(
            "movie-d",
            "tap-1",
            &origin.url("/vod/master.m3u8"),
            &CancellationToken::new(),
            |_| async {},
        )
        .await
        .unwrap();

    assert_eq!(std::fs::read_to_string(manifest).unwrap(), LOCAL_MEDIA);
    assert_eq!(origin.hits("/vod/hd/seg0.ts"), 1);
    assert_eq!(origin.hits("/vod/seg0.ts"), 0);
}

#[tokio::test]
async fn variant_loops_and_depth_are_bounded() {
    let origin = Origin::spawn().await;
    let dir = tempfile::tempdir().unwrap();

    let err = common::engine(dir.path())
        .run(
            "m",
            "loop",
            &origin.url("/loop/a.m3u8"),
            &CancellationToken::new(),
            |_| async {},
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::ManifestParse { .. }), "{err}");

    let shallow = DownloadEngine::new(
        common::fetcher(),
        EngineConfig::new(dir.path().join("Downloads"))
            .with_retry(RetryPolicy::immediate(0))
            .with_max_variant_depth(0),
    );
    let err = shallow
        .run(
            "m",
            "deep",
            &origin.url("/vod/master.m3u8"),
            &CancellationToken::new(),
            |_| async {},
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::ManifestParse { .. }), "{err}");
}

#[tokio::test]
async fn playlists_without_segments_are_rejected() {
    let origin = Origin::spawn().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = common::engine(dir.path());

    for path in ["/empty/index.m3u8", "/blank/index.m3u8"] {
        let err = engine
            .run("m", "e", &origin.url(path), &CancellationToken::new(), |_| async {})
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::ManifestParse { .. }), "{path}: {err}");
    }
    // parse failures are not retried
    assert_eq!(origin.hits("/blank/index.m3u8"), 1);
}

#[tokio::test]
async fn manifest_fetch_failure_is_retried_then_reported() {
    let origin = Origin::spawn().await;
    let dir = tempfile::tempdir().unwrap();

    let err = common::engine(dir.path())
        .run(
            "m",
            "e",
            &origin.url("/missing/index.m3u8"),
            &CancellationToken::new(),
            |_| async {},
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("404"));
    assert_eq!(origin.hits("/missing/index.m3u8"), 3);
}

#[tokio::test]
async fn resume_trusts_completed_segments() {
    let origin = Origin::spawn().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = common::engine(dir.path());
    let episode_dir = engine.episode_dir("movie-e", "tap-1");
    std::fs::create_dir_all(&episode_dir).unwrap();
    std::fs::write(episode_dir.join("seg_0.ts"), b"cached").unwrap();
    std::fs::write(episode_dir.join("seg_1.ts.part"), b"half").unwrap();
    let (progress, on_progress) = recorder();

    engine
        .run(
            "movie-e",
            "tap-1",
            &origin.url("/vod/index.m3u8"),
            &CancellationToken::new(),
            on_progress,
        )
        .await
        .unwrap();

    assert_eq!(origin.hits("/vod/seg0.ts"), 0);
    assert_eq!(origin.hits("/vod/seg1.ts"), 1);
    assert_eq!(std::fs::read(episode_dir.join("seg_0.ts")).unwrap(), b"cached");
    assert_eq!(std::fs::read(episode_dir.join("seg_1.ts")).unwrap(), SEG1);
    assert!(!episode_dir.join("seg_1.ts.part").exists());
    assert_eq!(*progress.lock(), vec![50, 100]);
}

#[tokio::test]
async fn cancelled_token_stops_before_fetching() {
    let origin = Origin::spawn().await;
    let dir = tempfile::tempdir().unwrap();
    let token = CancellationToken::new();
    token.cancel();

    let err = common::engine(dir.path())
        .run("m", "e", &origin.url("/vod/index.m3u8"), &token, |_| async {})
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::Cancelled));
    assert_eq!(origin.hits("/vod/index.m3u8"), 0);
}

#[tokio::test]
async fn purge_removes_download_folders() {
    let origin = Origin::spawn().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = common::engine(dir.path());
    for episode in ["tap-1", "tap-2"] {
        engine
            .run(
                "movie-f",
                episode,
                &origin.url("/vod/index.m3u8"),
                &CancellationToken::new(),
                |_| async {},
            )
            .await
            .unwrap();
    }

    engine.purge_episode("movie-f", "tap-1").await.unwrap();
    assert!(!engine.episode_dir("movie-f", "tap-1").exists());
    assert!(engine.episode_dir("movie-f", "tap-2").exists());

    engine.purge("movie-f").await.unwrap();
    assert!(!engine.movie_dir("movie-f").exists());
    // purging twice is fine
    engine.purge("movie-f").await.unwrap();
}

#[tokio::test]
async fn progress_stays_below_100_when_playlist_cannot_be_written() {
    let origin = Origin::spawn().await;
    let dir = tempfile::tempdir().unwrap();
    let engine = common::engine(dir.path());
    let (progress, on_progress) = recorder();

    let episode_dir = dir.path().join("Downloads").join("movie-c").join("tap-1");
    std::fs::create_dir_all(episode_dir.join("index.m3u8")).unwrap();

    let err = engine
        .run(
            "movie-c",
            "tap-1",
            &origin.url("/vod/index.m3u8"),
            &CancellationToken::new(),
            on_progress,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RelayError::Filesystem { .. }), "{err:?}");
    assert!(episode_dir.join("seg_1.ts").exists());
    assert_eq!(*progress.lock(), vec![50]);
}
