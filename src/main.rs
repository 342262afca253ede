//! civitai-sync-rs: backs up Civitai on-site generations to local disk.
//!
//! Walks the generation feed page by page, saving each record as JSON and
//! fetching its images. Runs are resumable: whatever is already on disk is
//! skipped, and a checkpoint remembers how far an oldest-first walk got.

#![warn(clippy::all)]

mod cli;
mod config;
mod download;
mod feed;
mod library;
pub mod retry;
mod shutdown;
mod store;
mod sync;
mod types;

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Command, CountArgs, LibraryArgs, SyncArgs};
use config::{FileConfig, LibraryPaths};
use download::MediaClient;
use feed::client::DEFAULT_ENDPOINT;
use feed::{Credential, FeedClient, HttpSession};
use library::Library;
use retry::RetryConfig;
use sync::{BarProgress, LogProgress, ProgressSink, SyncContext, SyncOptions, SyncOrchestrator, SyncOutcome, SyncState};

/// Maximum number of times a rejected key is re-prompted before giving up.
const MAX_REAUTH_ATTEMPTS: u32 = 3;

fn prompt_secret_key() -> anyhow::Result<String> {
    if !std::io::stdin().is_terminal() {
        anyhow::bail!(
            "No API key available.\n\
             Pass --secret-key, set CIVITAI_SECRET_KEY, or add \"secretKey\" to the config file."
        );
    }
    let key = rpassword::prompt_password("Civitai API key: ")?;
    let key = key.trim().to_string();
    if key.is_empty() {
        anyhow::bail!("No API key entered");
    }
    Ok(key)
}

/// Pick the API key: flag or environment first, then the config file,
/// then an interactive prompt.
fn resolve_secret_key(args: &SyncArgs, file: &FileConfig) -> anyhow::Result<String> {
    if let Some(key) = args.secret_key.as_deref().filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }
    if let Some(key) = file.usable_secret_key() {
        return Ok(key.to_string());
    }
    if file.key_encrypt {
        tracing::info!("The key in the config file is encrypted and cannot be read; enter it below");
    }
    prompt_secret_key()
}

fn log_summary(outcome: &SyncOutcome) {
    let report = &outcome.report;
    tracing::info!("── Summary ──");
    tracing::info!("  state: {}", outcome.state);
    tracing::info!(
        "  {} generations downloaded, {} saved",
        report.generations_downloaded,
        report.generations_saved
    );
    tracing::info!(
        "  {} images saved, {} skipped",
        report.images_saved,
        report.images_skipped
    );
    if let Some(range) = report.date_range() {
        tracing::info!("  dates: {}", range);
    }
    tracing::info!("  elapsed: {}", sync::format_duration(outcome.elapsed));
}

async fn run_sync(args: SyncArgs, file: &FileConfig, no_progress_bar: bool) -> anyhow::Result<()> {
    let paths = LibraryPaths::resolve(file, &args.library);
    let context = SyncContext {
        data_root: paths.data_root,
        media_root: paths.media_root,
        retry: RetryConfig {
            max_attempts: args.max_retries,
            delay: Duration::from_secs(args.retry_delay),
        },
        page_delay: Duration::from_millis(args.page_delay_ms),
        image_delay: Duration::from_millis(args.image_delay_ms),
    };
    let options = SyncOptions {
        mode: args.mode,
        overwrite: args.overwrite,
        with_images: !(args.exclude_images || file.exclude_images.unwrap_or(false)),
        check_images: args.check_images,
    };
    tracing::info!(
        data = %context.data_root.display(),
        media = %context.media_root.display(),
        "Starting civitai-sync-rs"
    );

    let mut key = resolve_secret_key(&args, file)?;
    let cancel = shutdown::install_signal_handler();
    let mut reauth_attempts = 0;

    loop {
        let credential = if args.session_cookie {
            Credential::SessionCookie(key.clone())
        } else {
            Credential::Bearer(key.clone())
        };
        let session = HttpSession::new(credential, args.timeout)?;
        let media: Arc<dyn MediaClient> = Arc::new(session.download_client());
        let source = FeedClient::new(Box::new(session), DEFAULT_ENDPOINT);

        let mut orchestrator = SyncOrchestrator::new(&context, source, media, cancel.clone());
        let start = orchestrator.start_cursor(options.mode).await?;
        let progress: Box<dyn ProgressSink> = if no_progress_bar || !std::io::stdout().is_terminal() {
            Box::new(LogProgress)
        } else {
            Box::new(BarProgress::new(false))
        };
        let outcome = orchestrator.run(start, options, progress.as_ref()).await;
        progress.finish();

        let rejected = outcome.state == SyncState::Failed
            && outcome.error.as_ref().is_some_and(|e| e.is_auth());
        if rejected {
            if !std::io::stdin().is_terminal() {
                anyhow::bail!(
                    "The API key was rejected.\n\
                     Create a new key in your Civitai account settings and pass it with \
                     --secret-key or CIVITAI_SECRET_KEY."
                );
            }
            if reauth_attempts < MAX_REAUTH_ATTEMPTS {
                reauth_attempts += 1;
                tracing::warn!(
                    "API key rejected (attempt {}/{}), enter a new one",
                    reauth_attempts,
                    MAX_REAUTH_ATTEMPTS
                );
                key = prompt_secret_key()?;
                continue;
            }
        }

        log_summary(&outcome);
        return match outcome.error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        };
    }
}

async fn run_count(args: CountArgs, file: &FileConfig) -> anyhow::Result<()> {
    let paths = LibraryPaths::resolve(file, &args.library);
    let with_images = !(args.exclude_images || file.exclude_images.unwrap_or(false));
    let started = std::time::Instant::now();
    let library = Library::new(paths.data_root, paths.media_root);
    let report = library.count(with_images, args.list_missing).await?;

    println!("Generations: {}", report.generations);
    if let (Some(from), Some(to)) = (report.from_date, report.to_date) {
        println!("Dates:       {} to {}", from, to);
    }
    if with_images {
        println!("Images:      {} created, {} saved", report.images_created, report.images_saved);
    }
    if args.list_missing && !report.images_missing.is_empty() {
        println!();
        println!("Missing images:");
        for missing in &report.images_missing {
            let note = if missing.available { "" } else { " (unavailable)" };
            println!("  {} {} {}{}", missing.date, missing.generation_id, missing.url, note);
        }
    }
    tracing::debug!("Counted in {}", sync::format_duration(started.elapsed()));
    Ok(())
}

async fn run_migrate(args: LibraryArgs, file: &FileConfig) -> anyhow::Result<()> {
    let paths = LibraryPaths::resolve(file, &args);
    let library = Library::new(paths.data_root, paths.media_root);
    let report = library.migrate_legacy_images().await?;
    tracing::info!(
        "Renamed {} images, removed {} duplicates",
        report.renamed,
        report.duplicates_removed
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    let file = FileConfig::load(&config::expand_tilde(&cli.config))?;

    match cli.command {
        Command::Sync(args) => run_sync(args, &file, cli.no_progress_bar).await,
        Command::Count(args) => run_count(args, &file).await,
        Command::Migrate(args) => run_migrate(args, &file).await,
    }
}
