use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::AppError;

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "hlsrelay=info,hlsrelay_engine=info,tower_http=info";

/// Filter used by `--verbose`.
const VERBOSE_LOG_FILTER: &str = "hlsrelay=debug,hlsrelay_engine=debug,tower_http=debug";

const LOG_FILE_PREFIX: &str = "hlsrelay.log";

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over both defaults. When `log_dir` is set, a second layer
/// writes to a daily-rotated file; keep the returned guard alive until exit
/// or buffered lines are lost.
pub fn init_logging(verbose: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>, AppError> {
    let fallback = if verbose {
        VERBOSE_LOG_FILTER
    } else {
        DEFAULT_LOG_FILTER
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(verbose))
        .with(file_layer)
        .try_init()
        .map_err(|e| {
            AppError::Initialization(format!("Failed to set global default subscriber: {e}"))
        })?;

    Ok(guard)
}
