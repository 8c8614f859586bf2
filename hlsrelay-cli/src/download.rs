//! One-shot `download` command.

use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hlsrelay_engine::{DownloadEngine, ManifestFetcher, local_uri, url_resolver};

use crate::cli::{DownloadArgs, HttpArgs};
use crate::config;
use crate::error::AppError;

fn download_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {msg}\n[{elapsed_precise}] [{bar:40.green/white}] {pos:>3}%")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

pub async fn run(args: DownloadArgs, http: &HttpArgs) -> Result<(), AppError> {
    if !url_resolver::is_http_url(&args.url) {
        return Err(AppError::InvalidInput(format!(
            "'{}' is not an http(s) URL",
            args.url
        )));
    }

    let fetcher = ManifestFetcher::new(&config::fetcher_config(http))?;
    let engine = DownloadEngine::new(fetcher, config::engine_config(http, &args.data_dir));

    let bar = if args.no_progress {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(100);
        bar.set_style(download_style());
        bar.set_message(format!("{}/{}", args.movie, args.episode));
        bar
    };

    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current segment");
            ctrl_c.cancel();
        }
    });

    let result = engine
        .run(&args.movie, &args.episode, &args.url, &token, |progress| {
            bar.set_position(u64::from(progress));
            async {}
        })
        .await;

    match result {
        Ok(path) => {
            bar.finish_with_message(format!("Finished {}/{}", args.movie, args.episode));
            info!(playlist = %local_uri(&path), "Download complete");
            Ok(())
        }
        Err(e) => {
            bar.abandon_with_message(format!("Failed {}/{}", args.movie, args.episode));
            Err(e.into())
        }
    }
}
