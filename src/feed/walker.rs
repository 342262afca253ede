//! Cursor-driven traversal of the generation feed.
//!
//! The walker owns everything about moving through the feed: retrying a
//! page that failed transiently, spacing consecutive requests, refusing to
//! re-request a cursor it was just handed, and honouring cancellation
//! before every request. What to do with each page is up to the caller's
//! [`PageHandler`].

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::FeedError;
use super::types::{Cursor, Page};
use crate::retry::{self, RetryAction, RetryConfig};

/// Anything that can produce a page for a cursor.
#[async_trait::async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, cursor: Option<&Cursor>) -> Result<Page, FeedError>;
}

/// Whether traversal should move on to the next page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageDecision {
    Continue,
    Stop,
}

/// Why a traversal ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The feed returned no next cursor.
    Exhausted,
    /// The handler asked to stop.
    Stopped,
    /// The feed handed back the cursor it was just given.
    CursorCycle,
    /// Cancellation was observed before a request.
    Cancelled,
}

/// Per-page callback driven by [`CursorWalker::traverse`].
#[async_trait::async_trait]
pub trait PageHandler: Send {
    type Error: From<FeedError> + Send;

    async fn on_page(&mut self, page: Page) -> Result<PageDecision, Self::Error>;
}

#[derive(Debug, Clone)]
pub struct WalkOptions {
    pub retry: RetryConfig,
    /// Pause between successful consecutive page requests.
    pub page_delay: Duration,
    pub cancel: CancellationToken,
}

pub struct CursorWalker<S> {
    source: S,
    options: WalkOptions,
}

impl<S: PageSource> CursorWalker<S> {
    pub fn new(source: S, options: WalkOptions) -> Self {
        Self { source, options }
    }

    /// Walk the feed from `start` (newest page when `None`), handing each
    /// page to `handler` until the feed, the handler, or cancellation ends it.
    pub async fn traverse<H: PageHandler>(
        &self,
        start: Option<Cursor>,
        handler: &mut H,
    ) -> Result<Termination, H::Error> {
        let mut cursor = start;
        let mut previous: Option<Cursor> = None;
        let mut pages = 0u64;

        loop {
            if self.options.cancel.is_cancelled() {
                debug!(pages, "Cancellation observed before page request");
                return Ok(Termination::Cancelled);
            }
            if cursor.is_some() && cursor == previous {
                debug!(pages, cursor = ?cursor.as_ref().map(|c| c.to_string()), "Cursor repeated, feed lap complete");
                return Ok(Termination::CursorCycle);
            }

            let page = retry::retry_with_delay(
                &self.options.retry,
                |e: &FeedError| {
                    if e.is_retryable() {
                        RetryAction::Retry
                    } else {
                        RetryAction::Abort
                    }
                },
                || self.source.fetch_page(cursor.as_ref()),
            )
            .await?;
            pages += 1;

            debug!(
                page = pages,
                items = page.items.len(),
                has_next = page.next_cursor.is_some(),
                "Fetched page"
            );

            let next = page.next_cursor.clone();
            if handler.on_page(page).await? == PageDecision::Stop {
                return Ok(Termination::Stopped);
            }

            match next {
                Some(next) => {
                    previous = std::mem::replace(&mut cursor, Some(next));
                    if !self.options.page_delay.is_zero() {
                        tokio::time::sleep(self.options.page_delay).await;
                    }
                }
                None => return Ok(Termination::Exhausted),
            }
        }
    }
}
