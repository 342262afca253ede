//! Read-side view of what a previous sync left on disk: listing, counting,
//! and migrating images saved under the old URL-based names.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::download::paths::{canonical_image_path, date_dir, legacy_image_path, parse_date_dir};
use crate::feed::GenerationRecord;
use crate::store::{read_record, StoreError};

/// Record ids from the first version of the feed were this short.
const LEGACY_ID_LEN: usize = 8;

/// Per-record callback for [`Library::for_each_generation`].
#[async_trait::async_trait]
pub trait GenerationVisitor: Send {
    /// `date` is the directory the record was found in.
    async fn visit(&mut self, date: NaiveDate, record: GenerationRecord) -> Result<(), StoreError>;
}

/// An image the record lists but that is not on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingImage {
    pub generation_id: String,
    pub date: NaiveDate,
    pub url: String,
    /// Whether the feed reported the image as fetchable.
    pub available: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LibraryReport {
    pub generations: u64,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    /// Images that exist, either on disk or fetchable from the feed.
    pub images_created: u64,
    pub images_saved: u64,
    /// Only filled when requested.
    pub images_missing: Vec<MissingImage>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MigrateReport {
    pub renamed: u64,
    /// Legacy copies deleted because the canonical file already existed.
    pub duplicates_removed: u64,
}

pub struct Library {
    data_root: PathBuf,
    media_root: PathBuf,
}

impl Library {
    pub fn new(data_root: PathBuf, media_root: PathBuf) -> Self {
        Self {
            data_root,
            media_root,
        }
    }

    /// Date directories under the data root, oldest first.
    pub async fn generation_dates(&self) -> Result<Vec<NaiveDate>, StoreError> {
        let mut dates: Vec<NaiveDate> = list_dir(&self.data_root)
            .await?
            .iter()
            .filter_map(|name| parse_date_dir(name))
            .collect();
        dates.sort();
        Ok(dates)
    }

    /// Ids of the records saved under `date`, sorted. Ids of the first feed
    /// version are left out unless `include_legacy` is set.
    pub async fn generation_ids(&self, date: NaiveDate, include_legacy: bool) -> Result<Vec<String>, StoreError> {
        let dir = self.data_root.join(date_dir(date));
        let mut ids: Vec<String> = list_dir(&dir)
            .await?
            .into_iter()
            .filter(|name| !name.starts_with('.'))
            .filter_map(|name| name.strip_suffix(".json").map(str::to_string))
            .filter(|id| include_legacy || id.len() > LEGACY_ID_LEN)
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Visit every saved record in date order. Records that cannot be read
    /// are logged and skipped.
    pub async fn for_each_generation<V: GenerationVisitor>(&self, visitor: &mut V) -> Result<(), StoreError> {
        for date in self.generation_dates().await? {
            for id in self.generation_ids(date, false).await? {
                let path = self.data_root.join(date_dir(date)).join(format!("{}.json", id));
                let record = match read_record(&path).await {
                    Ok(record) => record,
                    Err(e @ StoreError::Corrupt { .. }) => {
                        tracing::warn!("Skipping record: {}", e);
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                visitor.visit(date, record).await?;
            }
        }
        Ok(())
    }

    pub async fn count(&self, with_images: bool, with_missing: bool) -> Result<LibraryReport, StoreError> {
        let mut counter = Counter {
            media_root: &self.media_root,
            with_images,
            with_missing,
            report: LibraryReport::default(),
        };
        self.for_each_generation(&mut counter).await?;
        Ok(counter.report)
    }

    /// Move every image still saved under its URL-based name to its
    /// canonical path. Where both exist the legacy copy is deleted.
    pub async fn migrate_legacy_images(&self) -> Result<MigrateReport, StoreError> {
        let mut migrator = Migrator {
            media_root: &self.media_root,
            report: MigrateReport::default(),
        };
        self.for_each_generation(&mut migrator).await?;
        Ok(migrator.report)
    }
}

/// Entry names of `dir`; a missing directory is empty.
async fn list_dir(dir: &Path) -> Result<Vec<String>, StoreError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(dir, e)),
    };
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| StoreError::io(dir, e))? {
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

async fn exists(path: &Path) -> Result<bool, StoreError> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| StoreError::io(path, e))
}

struct Counter<'a> {
    media_root: &'a Path,
    with_images: bool,
    with_missing: bool,
    report: LibraryReport,
}

#[async_trait::async_trait]
impl<'a> GenerationVisitor for Counter<'a> {
    async fn visit(&mut self, date: NaiveDate, record: GenerationRecord) -> Result<(), StoreError> {
        let report = &mut self.report;
        report.generations += 1;
        report.from_date = Some(report.from_date.map_or(date, |d| d.min(date)));
        report.to_date = Some(report.to_date.map_or(date, |d| d.max(date)));

        if !self.with_images {
            return Ok(());
        }
        for image in record.images() {
            let canonical = canonical_image_path(self.media_root, date, record.id(), image.seed);
            let on_disk = exists(&canonical).await?
                || match legacy_image_path(self.media_root, date, &image.url) {
                    Some(legacy) => exists(&legacy).await?,
                    None => false,
                };
            if on_disk {
                self.report.images_saved += 1;
                self.report.images_created += 1;
                continue;
            }
            if image.available {
                self.report.images_created += 1;
            }
            if self.with_missing {
                self.report.images_missing.push(MissingImage {
                    generation_id: record.id().to_string(),
                    date,
                    url: image.url.clone(),
                    available: image.available,
                });
            }
        }
        Ok(())
    }
}

struct Migrator<'a> {
    media_root: &'a Path,
    report: MigrateReport,
}

#[async_trait::async_trait]
impl<'a> GenerationVisitor for Migrator<'a> {
    async fn visit(&mut self, date: NaiveDate, record: GenerationRecord) -> Result<(), StoreError> {
        for image in record.images() {
            let Some(legacy) = legacy_image_path(self.media_root, date, &image.url) else {
                continue;
            };
            let canonical = canonical_image_path(self.media_root, date, record.id(), image.seed);
            if legacy == canonical || !exists(&legacy).await? {
                continue;
            }
            if exists(&canonical).await? {
                tokio::fs::remove_file(&legacy)
                    .await
                    .map_err(|e| StoreError::io(&legacy, e))?;
                tracing::debug!("Removed duplicate {}", legacy.display());
                self.report.duplicates_removed += 1;
            } else {
                tokio::fs::rename(&legacy, &canonical)
                    .await
                    .map_err(|e| StoreError::io(&legacy, e))?;
                tracing::debug!("Renamed {} -> {}", legacy.display(), canonical.display());
                self.report.renamed += 1;
            }
        }
        Ok(())
    }
}
