use clap::Parser;
use tracing::{error, info};

mod cli;
mod config;
mod download;
mod error;
mod logging;
mod server;
mod utils;

use cli::{CliArgs, Command};
use error::AppError;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        error!(error = ?e, "Application failed");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    dotenvy::dotenv().ok();

    let args = CliArgs::parse();
    let _log_guard = logging::init_logging(args.verbose, args.log_dir.as_deref())?;

    info!(version = env!("CARGO_PKG_VERSION"), "hlsrelay starting");

    match args.command {
        Command::Serve(serve) => server::serve(serve, &args.http).await,
        Command::Download(download) => download::run(download, &args.http).await,
    }
}
