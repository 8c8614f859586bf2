use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Define CLI arguments
#[derive(Parser, Debug)]
#[command(
    version,
    about = "HLS rewriting proxy and offline downloader",
    long_about = "Relays HLS playlists through a local proxy that rewrites every segment,\n\
                  key and variant reference, and downloads whole episodes for offline\n\
                  playback with a persistent download queue."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true, help = "Enable detailed debug logging")]
    pub verbose: bool,

    /// Directory for rolling log files
    #[arg(
        long,
        global = true,
        env = "HLSRELAY_LOG_DIR",
        help = "Write daily-rotated log files to this directory"
    )]
    pub log_dir: Option<PathBuf>,

    #[command(flatten)]
    pub http: HttpArgs,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the proxy, the downloads API and the queue worker
    Serve(ServeArgs),
    /// Download one episode and exit
    Download(DownloadArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address the HTTP server listens on
    #[arg(
        long,
        env = "HLSRELAY_BIND",
        default_value = "0.0.0.0:8787",
        help = "Socket address to listen on"
    )]
    pub bind: String,

    /// Root directory for downloads and the registry
    #[arg(
        long,
        env = "HLSRELAY_DATA_DIR",
        default_value = "./data",
        help = "Directory holding Downloads/ and downloads.json"
    )]
    pub data_dir: PathBuf,

    /// Prefix used in rewritten playlist references
    #[arg(
        long,
        env = "HLSRELAY_PROXY_BASE",
        default_value = "/proxy",
        help = "Path or absolute URL that rewritten references point back to"
    )]
    pub proxy_base: String,

    /// Do not resume pending downloads at startup
    #[arg(long, help = "Leave the download queue idle until a client starts it")]
    pub no_resume: bool,
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// HLS playlist to download
    #[arg(required = true, help = "URL of the master or media playlist")]
    pub url: String,

    #[arg(long, help = "Movie slug used for the download folder")]
    pub movie: String,

    #[arg(long, help = "Episode slug used for the download folder")]
    pub episode: String,

    #[arg(
        long,
        env = "HLSRELAY_DATA_DIR",
        default_value = "./data",
        help = "Directory holding Downloads/"
    )]
    pub data_dir: PathBuf,

    /// Hide the progress bar
    #[arg(long, help = "Disable the progress bar")]
    pub no_progress: bool,
}

/// Upstream HTTP options shared by both commands
#[derive(Args, Debug, Clone)]
pub struct HttpArgs {
    /// Add custom HTTP header
    #[arg(
        short = 'H',
        long = "header",
        global = true,
        help = "Add custom HTTP header (format: 'Name: Value'). Can be used multiple times."
    )]
    pub headers: Vec<String>,

    #[arg(
        long,
        global = true,
        env = "HLSRELAY_USER_AGENT",
        help = "User agent sent to upstream servers"
    )]
    pub user_agent: Option<String>,

    /// Retries per manifest or segment fetch
    #[arg(
        long,
        global = true,
        default_value = "2",
        help = "Extra attempts after a failed manifest or segment fetch"
    )]
    pub retries: u32,

    #[arg(
        long,
        global = true,
        default_value = "500",
        help = "Delay before each retry in milliseconds (up to 300ms jitter is added)"
    )]
    pub retry_delay_ms: u64,

    /// Overall timeout for HTTP requests in seconds
    #[arg(
        long,
        global = true,
        default_value = "0",
        help = "Overall timeout in seconds for each upstream request (0 = no timeout)"
    )]
    pub timeout: u64,

    /// Connection timeout in seconds
    #[arg(
        long,
        global = true,
        default_value = "30",
        help = "Timeout in seconds for establishing connections"
    )]
    pub connect_timeout: u64,

    #[arg(
        long,
        global = true,
        default_value = "30",
        help = "Abort an upstream response after this many seconds without data (0 = never)"
    )]
    pub read_timeout: u64,

    /// Disable all proxy settings for upstream requests
    #[arg(
        long,
        global = true,
        help = "Ignore system/environment proxy settings for upstream requests"
    )]
    pub no_proxy: bool,
}
