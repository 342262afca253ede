//! Sync engine: walks the feed and mirrors every page to disk.
//!
//! One sequential pipeline. For each page the walker hands over, every
//! record is saved, then its images are fetched when the run calls for it.
//! After the page the continuation policy decides whether to ask for the
//! next one, and the resume checkpoint is moved forward.

pub mod error;
pub mod report;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::download::{MediaClient, MediaFetcher};
use crate::feed::{Cursor, CursorWalker, Page, PageDecision, PageHandler, PageSource, Termination, WalkOptions};
use crate::retry::RetryConfig;
use crate::store::{CheckpointStore, RecordStore, StoreError};
use crate::types::SyncMode;

pub use error::SyncError;
pub use report::{format_duration, BarProgress, LogProgress, ProgressSink, SyncReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Paging,
    Saving,
    Aborted,
    Complete,
    Failed,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncState::Idle => "idle",
            SyncState::Paging => "paging",
            SyncState::Saving => "saving",
            SyncState::Aborted => "aborted",
            SyncState::Complete => "complete",
            SyncState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Where files go and how hard to lean on the remote.
#[derive(Debug, Clone)]
pub struct SyncContext {
    pub data_root: PathBuf,
    pub media_root: PathBuf,
    pub retry: RetryConfig,
    pub page_delay: Duration,
    pub image_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub mode: SyncMode,
    pub overwrite: bool,
    pub with_images: bool,
    pub check_images: bool,
}

impl SyncOptions {
    pub fn new(mode: SyncMode) -> Self {
        Self {
            mode,
            overwrite: false,
            with_images: true,
            check_images: false,
        }
    }

    /// Whether images of records already on disk are looked at too.
    fn checks_images(&self) -> bool {
        self.check_images || self.mode == SyncMode::Missing
    }

    fn keeps_going(&self, page_new: u64) -> bool {
        page_new > 0 || matches!(self.mode, SyncMode::Missing | SyncMode::Oldest)
    }
}

/// How a run ended.
#[derive(Debug)]
pub struct SyncOutcome {
    pub state: SyncState,
    pub report: SyncReport,
    /// Set when `state` is [`SyncState::Failed`].
    pub error: Option<SyncError>,
    pub elapsed: Duration,
}

pub struct SyncOrchestrator<S> {
    walker: CursorWalker<S>,
    store: RecordStore,
    checkpoints: CheckpointStore,
    fetcher: MediaFetcher,
    cancel: CancellationToken,
    state: SyncState,
}

impl<S: PageSource> SyncOrchestrator<S> {
    pub fn new(
        context: &SyncContext,
        source: S,
        media: Arc<dyn MediaClient>,
        cancel: CancellationToken,
    ) -> Self {
        let walker = CursorWalker::new(
            source,
            WalkOptions {
                retry: context.retry,
                page_delay: context.page_delay,
                cancel: cancel.clone(),
            },
        );
        Self {
            walker,
            store: RecordStore::new(context.data_root.clone()),
            checkpoints: CheckpointStore::new(&context.data_root),
            fetcher: MediaFetcher::new(media, context.media_root.clone(), context.image_delay),
            cancel,
            state: SyncState::Idle,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Cursor a run in `mode` should start from: the saved checkpoint for
    /// [`SyncMode::Oldest`], the newest page otherwise.
    pub async fn start_cursor(&self, mode: SyncMode) -> Result<Option<Cursor>, StoreError> {
        if mode != SyncMode::Oldest {
            return Ok(None);
        }
        let checkpoint = self.checkpoints.load().await?;
        let cursor = checkpoint.as_ref().and_then(|c| c.resume_cursor()).cloned();
        match &cursor {
            Some(c) => tracing::info!("Resuming from checkpoint cursor {}", c),
            None => tracing::info!("No resumable checkpoint, starting from the newest page"),
        }
        Ok(cursor)
    }

    /// Walk the feed from `start` and mirror what it returns.
    pub async fn run(
        &mut self,
        start: Option<Cursor>,
        options: SyncOptions,
        progress: &dyn ProgressSink,
    ) -> SyncOutcome {
        let started = Instant::now();
        self.state = SyncState::Paging;
        tracing::info!(
            mode = options.mode.as_str(),
            overwrite = options.overwrite,
            images = options.with_images,
            "Starting sync"
        );

        // Runs that only look at the top of the feed must not disturb an
        // existing resume point.
        let may_checkpoint = match options.mode {
            SyncMode::Latest => match self.checkpoints.load().await {
                Ok(existing) => existing.is_none(),
                Err(e) => return self.finish(SyncReport::default(), Some(e.into()), started),
            },
            SyncMode::Oldest | SyncMode::Missing => true,
        };

        let mut handler = PageProcessor {
            store: &self.store,
            fetcher: &self.fetcher,
            checkpoints: &self.checkpoints,
            cancel: &self.cancel,
            state: &mut self.state,
            progress,
            options,
            may_checkpoint,
            report: SyncReport::default(),
            aborted: false,
        };

        let result = self.walker.traverse(start, &mut handler).await;
        let PageProcessor { report, aborted, .. } = handler;

        match result {
            Ok(Termination::Cancelled) => self.abort(report, started),
            Ok(Termination::Stopped) if aborted => self.abort(report, started),
            Ok(end @ (Termination::Exhausted | Termination::CursorCycle)) => {
                if end == Termination::CursorCycle {
                    tracing::info!("Feed returned a cursor it already served, stopping");
                } else {
                    tracing::info!("Reached the end of the feed");
                }
                // A repeated cursor is the end of the feed for resume purposes.
                let marked = if may_checkpoint {
                    self.checkpoints.mark_exhausted().await.err().map(SyncError::from)
                } else {
                    None
                };
                self.finish(report, marked, started)
            }
            Ok(Termination::Stopped) => {
                tracing::info!("No new generations on the last page, stopping");
                self.finish(report, None, started)
            }
            Err(e) => self.finish(report, Some(e), started),
        }
    }

    fn abort(&mut self, report: SyncReport, started: Instant) -> SyncOutcome {
        tracing::info!("Sync cancelled");
        self.state = SyncState::Aborted;
        SyncOutcome {
            state: self.state,
            report,
            error: None,
            elapsed: started.elapsed(),
        }
    }

    fn finish(&mut self, report: SyncReport, error: Option<SyncError>, started: Instant) -> SyncOutcome {
        self.state = if error.is_some() {
            SyncState::Failed
        } else {
            SyncState::Complete
        };
        if let Some(e) = &error {
            tracing::error!("Sync failed: {}", e);
        }
        SyncOutcome {
            state: self.state,
            report,
            error,
            elapsed: started.elapsed(),
        }
    }
}

/// Per-page work for one run.
struct PageProcessor<'a> {
    store: &'a RecordStore,
    fetcher: &'a MediaFetcher,
    checkpoints: &'a CheckpointStore,
    cancel: &'a CancellationToken,
    state: &'a mut SyncState,
    progress: &'a dyn ProgressSink,
    options: SyncOptions,
    may_checkpoint: bool,
    report: SyncReport,
    aborted: bool,
}

#[async_trait::async_trait]
impl<'a> PageHandler for PageProcessor<'a> {
    type Error = SyncError;

    async fn on_page(&mut self, page: Page) -> Result<PageDecision, SyncError> {
        *self.state = SyncState::Saving;
        let mut page_new = 0u64;

        for record in &page.items {
            if self.cancel.is_cancelled() {
                self.aborted = true;
                return Ok(PageDecision::Stop);
            }

            self.report.generations_downloaded += 1;
            self.report.note_date(record.date());

            let saved = self.store.save(record, self.options.overwrite).await?;
            if saved.saved {
                self.report.generations_saved += 1;
                page_new += 1;
            }

            let wants_images = saved.saved || self.options.overwrite || self.options.checks_images();
            if self.options.with_images && wants_images {
                let fetched = self
                    .fetcher
                    .fetch_assets(record, self.options.overwrite, self.cancel)
                    .await?;
                let images = fetched.saved.len() as u64;
                self.report.images_saved += images;
                self.report.images_skipped += fetched.skipped;
                page_new += images;
                if fetched.cancelled {
                    self.progress.on_progress(&self.report);
                    self.aborted = true;
                    return Ok(PageDecision::Stop);
                }
            }

            self.progress.on_progress(&self.report);
        }
        self.progress.on_progress(&self.report);

        if let (Some(next), true) = (&page.next_cursor, self.may_checkpoint) {
            self.checkpoints.record_cursor(next).await?;
        }

        let keep_going = self.options.keeps_going(page_new);
        let (items, mode) = (page.items.len(), self.options.mode.as_str());
        self.progress.suspend(&mut || {
            tracing::debug!(items, new = page_new, mode, continue_ = keep_going, "Page processed");
        });

        *self.state = SyncState::Paging;
        Ok(if keep_going {
            PageDecision::Continue
        } else {
            PageDecision::Stop
        })
    }
}
