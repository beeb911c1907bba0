// src/services/adapter.rs

//! Source adapter contract and the paginated crawl loop.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{FetchError, FetchResult};
use crate::models::{CrawlConfig, HttpConfig, RawRecord, SearchQuery, SourceId};

/// One page of upstream results after extraction.
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// Records that passed extraction
    pub records: Vec<RawRecord>,

    /// Items dropped for missing required fields
    pub skipped: usize,
}

impl Page {
    /// Items the upstream returned on this page, extracted or not.
    pub fn item_count(&self) -> usize {
        self.records.len() + self.skipped
    }
}

/// Why a crawl stopped paging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopReason {
    /// A page yielded zero records
    #[default]
    EmptyPage,
    /// A page was shorter than the upstream's full page
    ShortPage,
    /// The query's result cap was reached
    LimitReached,
    /// The page-count safety ceiling was hit
    PageCeiling,
}

/// Result of a full paginated crawl.
#[derive(Debug, Default)]
pub struct CrawlOutcome {
    pub records: Vec<RawRecord>,
    pub pages: usize,
    pub skipped: usize,
    /// Records repeated across pages, dropped after their first sighting
    pub repeated: usize,
    pub stop: StopReason,
}

/// Paging limits shared by every adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlLimits {
    pub max_pages: usize,
    pub request_delay: Duration,
}

impl Default for CrawlLimits {
    fn default() -> Self {
        Self::new(&CrawlConfig::default(), &HttpConfig::default())
    }
}

impl CrawlLimits {
    pub fn new(crawl: &CrawlConfig, http: &HttpConfig) -> Self {
        Self {
            max_pages: crawl.max_pages.max(1),
            request_delay: Duration::from_millis(http.request_delay_ms),
        }
    }
}

/// One upstream listing source.
///
/// Implementors provide single-page [`fetch`](SourceAdapter::fetch); the
/// default [`crawl`](SourceAdapter::crawl) pages through results with it.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable display name.
    fn name(&self) -> &str;

    /// Stable source identifier.
    fn source_id(&self) -> SourceId;

    /// Number of items the upstream returns on a full page.
    fn page_size(&self) -> usize;

    fn limits(&self) -> CrawlLimits {
        CrawlLimits::default()
    }

    /// Fetch the single page starting at `query.offset`.
    ///
    /// Must return promptly with [`FetchError::Timeout`] once `cancel` fires.
    async fn fetch(&self, query: &SearchQuery, cancel: &CancellationToken) -> FetchResult<Page>;

    /// Page through results until a termination condition holds.
    async fn crawl(
        &self,
        query: &SearchQuery,
        cancel: &CancellationToken,
    ) -> FetchResult<CrawlOutcome> {
        crawl_pages(self, query, cancel).await
    }
}

/// Drive `adapter` page by page.
///
/// After every page the stop conditions are checked in order: empty page,
/// short page, cap reached, page ceiling. Any page failure aborts the crawl.
pub async fn crawl_pages<A>(
    adapter: &A,
    query: &SearchQuery,
    cancel: &CancellationToken,
) -> FetchResult<CrawlOutcome>
where
    A: SourceAdapter + ?Sized,
{
    let page_size = adapter.page_size().max(1);
    let limits = adapter.limits();
    let mut outcome = CrawlOutcome::default();
    let mut seen = HashSet::new();
    let mut offset = query.offset;

    loop {
        if cancel.is_cancelled() {
            return Err(FetchError::cancelled());
        }

        let page = adapter.fetch(&query.at_offset(offset), cancel).await?;
        // A page finished after cancellation may be incomplete
        if cancel.is_cancelled() {
            return Err(FetchError::cancelled());
        }
        outcome.pages += 1;
        outcome.skipped += page.skipped;

        let items = page.item_count();
        let received = page.records.len();
        for record in page.records {
            if seen.insert(record.external_id.clone()) {
                outcome.records.push(record);
            } else {
                outcome.repeated += 1;
            }
        }

        log::debug!(
            "[{}] page {} at offset {}: {} records, {} items",
            adapter.name(),
            outcome.pages,
            offset,
            received,
            items
        );

        let stop = if received == 0 {
            Some(StopReason::EmptyPage)
        } else if items < page_size {
            Some(StopReason::ShortPage)
        } else if outcome.records.len() >= query.limit {
            Some(StopReason::LimitReached)
        } else if outcome.pages >= limits.max_pages {
            Some(StopReason::PageCeiling)
        } else {
            None
        };

        if let Some(reason) = stop {
            outcome.stop = reason;
            break;
        }

        offset += page_size;
        if !limits.request_delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::cancelled()),
                _ = tokio::time::sleep(limits.request_delay) => {}
            }
        }
    }

    outcome.records.truncate(query.limit);

    if outcome.stop == StopReason::PageCeiling {
        log::warn!(
            "[{}] stopped at page ceiling ({} pages)",
            adapter.name(),
            outcome.pages
        );
    }
    log::info!(
        "[{}] crawled {} records over {} pages ({} skipped, {:?})",
        adapter.name(),
        outcome.records.len(),
        outcome.pages,
        outcome.skipped,
        outcome.stop
    );

    Ok(outcome)
}
