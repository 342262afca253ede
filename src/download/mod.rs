//! Image fetcher: brings every image of a record to its canonical path,
//! reusing what earlier runs (and earlier naming schemes) left on disk.
//!
//! Images are fetched one at a time with a fixed pause after each real
//! download, so a long backfill stays polite towards the image host.

pub mod error;
pub mod file;
pub mod paths;

use std::fs::FileTimes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;

use crate::feed::{GenerationRecord, ImageRef};

pub use error::DownloadError;
pub use file::{download_file, ByteStream, MediaClient};

/// What happened to one record's images.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Files written by this call, in image order.
    pub saved: Vec<PathBuf>,
    /// Images that could not be fetched this time.
    pub skipped: u64,
    /// Cancellation was observed before all images were handled.
    pub cancelled: bool,
}

enum ImageAction {
    AlreadyPresent,
    Migrated,
    Unavailable,
    Fetch,
}

pub struct MediaFetcher {
    client: Arc<dyn MediaClient>,
    media_root: PathBuf,
    image_delay: Duration,
}

impl MediaFetcher {
    pub fn new(client: Arc<dyn MediaClient>, media_root: PathBuf, image_delay: Duration) -> Self {
        Self {
            client,
            media_root,
            image_delay,
        }
    }

    /// Bring every image of `record` to its canonical path.
    ///
    /// Cancellation is checked before each image; a download already in
    /// progress is finished and counted.
    pub async fn fetch_assets(
        &self,
        record: &GenerationRecord,
        overwrite: bool,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, DownloadError> {
        let mut outcome = FetchOutcome::default();
        if record.images().is_empty() {
            return Ok(outcome);
        }

        let date = record.date();
        let day_dir = self.media_root.join(paths::date_dir(date));
        tokio::fs::create_dir_all(&day_dir).await?;

        for image in record.images() {
            if cancel.is_cancelled() {
                tracing::debug!(id = record.id(), "Cancellation observed before image");
                outcome.cancelled = true;
                break;
            }

            let canonical = paths::canonical_image_path(&self.media_root, date, record.id(), image.seed);
            match self.prepare(record, image, &canonical, overwrite).await? {
                ImageAction::AlreadyPresent | ImageAction::Migrated => continue,
                ImageAction::Unavailable => {
                    tracing::warn!(
                        "Image {}_{} is not available, skipping",
                        record.id(),
                        image.seed
                    );
                    outcome.skipped += 1;
                    continue;
                }
                ImageAction::Fetch => {}
            }

            tracing::debug!(url = %image.url, path = %canonical.display(), "downloading");
            match download_file(self.client.as_ref(), &image.url, &canonical, overwrite).await {
                Ok(bytes) => {
                    tracing::debug!(bytes, "Downloaded {}", canonical.display());
                    stamp_mtime(&canonical, record).await;
                    outcome.saved.push(canonical);
                    if !self.image_delay.is_zero() {
                        tokio::time::sleep(self.image_delay).await;
                    }
                }
                Err(e) if e.is_skippable() => {
                    tracing::warn!("Skipping image {}_{}: {}", record.id(), image.seed, e);
                    outcome.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(outcome)
    }

    /// Decide what to do for one image, migrating a legacy file when one
    /// is found. Never removes anything: with `overwrite` an existing file
    /// stays in place until a complete replacement is renamed over it.
    async fn prepare(
        &self,
        record: &GenerationRecord,
        image: &ImageRef,
        canonical: &Path,
        overwrite: bool,
    ) -> Result<ImageAction, DownloadError> {
        let present = tokio::fs::try_exists(canonical).await?;
        if present && !overwrite {
            return Ok(ImageAction::AlreadyPresent);
        }

        if !present {
            if let Some(legacy) = paths::legacy_image_path(&self.media_root, record.date(), &image.url) {
                if legacy != canonical && tokio::fs::try_exists(&legacy).await? {
                    tokio::fs::rename(&legacy, canonical).await?;
                    tracing::info!(
                        "Renamed {} -> {}",
                        legacy.display(),
                        canonical.display()
                    );
                    return Ok(ImageAction::Migrated);
                }
            }
        }

        if !image.available {
            return Ok(ImageAction::Unavailable);
        }
        Ok(ImageAction::Fetch)
    }
}

/// Give a downloaded image the record's creation time as its mtime, so
/// file browsers sort the library the way the feed does.
async fn stamp_mtime(path: &Path, record: &GenerationRecord) {
    let mtime_path = path.to_path_buf();
    let ts = record.created_at().timestamp();
    match tokio::task::spawn_blocking(move || set_file_mtime(&mtime_path, ts)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("Could not set mtime on {}: {}", path.display(), e),
        Err(e) => tracing::warn!("mtime task panicked: {}", e),
    }
}

/// Set the modification and access times of a file to the given Unix
/// timestamp, clamping dates before 1970 to the epoch.
fn set_file_mtime(path: &Path, timestamp: i64) -> std::io::Result<()> {
    let time = if timestamp >= 0 {
        UNIX_EPOCH + Duration::from_secs(timestamp as u64)
    } else {
        SystemTime::UNIX_EPOCH
    };
    let times = FileTimes::new().set_modified(time).set_accessed(time);
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_times(times)?;
    Ok(())
}
