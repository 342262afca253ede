use clap::{Args, Parser, Subcommand};

use crate::types::{LogLevel, SyncMode};

#[derive(Parser, Debug)]
#[command(
    name = "civitai-sync-rs",
    version,
    about = "Back up your Civitai on-site generations and their images"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Config file (JSON)
    #[arg(long, global = true, default_value = "~/.civitai-sync/config.json")]
    pub config: String,

    /// Log level
    #[arg(long, value_enum, global = true, default_value = "info")]
    pub log_level: LogLevel,

    /// Disable progress bar
    #[arg(long, global = true)]
    pub no_progress_bar: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download generations (and their images) from the feed
    Sync(SyncArgs),
    /// Count the generations and images already on disk
    Count(CountArgs),
    /// Rename images saved under their URL names to the current naming scheme
    Migrate(LibraryArgs),
}

/// Where the local library lives. Overrides the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct LibraryArgs {
    /// Directory for generation records
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Directory for images
    #[arg(long)]
    pub media_dir: Option<String>,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub library: LibraryArgs,

    /// Where to start and when to stop
    #[arg(long, value_enum, default_value = "latest")]
    pub mode: SyncMode,

    /// Replace records and images already on disk
    #[arg(long)]
    pub overwrite: bool,

    /// Only save generation records, no images
    #[arg(long)]
    pub exclude_images: bool,

    /// Also fetch missing images of records already on disk
    #[arg(long)]
    pub check_images: bool,

    /// Civitai API key (if not provided, read from config or prompted).
    /// WARNING: passing via --secret-key is visible in process listings.
    /// Prefer the CIVITAI_SECRET_KEY environment variable instead.
    #[arg(long, env = "CIVITAI_SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// Send the key as a browser session cookie instead of a bearer token
    #[arg(long)]
    pub session_cookie: bool,

    /// Total attempts per page on transient server errors
    #[arg(long, default_value_t = 10)]
    pub max_retries: u32,

    /// Seconds between page attempts
    #[arg(long, default_value_t = 2)]
    pub retry_delay: u64,

    /// Milliseconds between consecutive pages
    #[arg(long, default_value_t = 1000)]
    pub page_delay_ms: u64,

    /// Milliseconds after each downloaded image
    #[arg(long, default_value_t = 200)]
    pub image_delay_ms: u64,

    /// HTTP request timeout in seconds
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,
}

#[derive(Args, Debug)]
pub struct CountArgs {
    #[command(flatten)]
    pub library: LibraryArgs,

    /// Only count generation records
    #[arg(long)]
    pub exclude_images: bool,

    /// List images that are not on disk
    #[arg(long)]
    pub list_missing: bool,
}
