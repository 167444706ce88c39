//! Sequential, lazily driven walk over a paginated result set.
//!
//! Page 0 is the authority on how many records the session holds. Every later
//! page must agree with it, both on the reported total and on how many rows it
//! carries, or the walk stops with a consistency error.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use futures::stream;

use crate::fetcher::{Fetcher, TransportError, with_timeout};
use crate::limiter::RateLimiter;
use crate::parser::{PageParser, ParseError};
use crate::query::RequestSpec;
use crate::types::Record;

#[derive(Debug, thiserror::Error)]
pub enum ScreenerError {
    #[error("Failed to fetch page {page}: {source}")]
    Transport {
        page: usize,
        #[source]
        source: TransportError,
    },
    #[error("Failed to parse page {page}: {source}")]
    Parse {
        page: usize,
        #[source]
        source: ParseError,
    },
    #[error("Page {page} has {found} row(s), expected {expected}")]
    RowCountMismatch {
        page: usize,
        expected: usize,
        found: usize,
    },
    #[error("Page {page} reports {found} total record(s), first page reported {expected}")]
    TotalChanged {
        page: usize,
        expected: usize,
        found: usize,
    },
    #[error("Page {requested} is out of range (session has {pages} page(s))")]
    PageOutOfRange { requested: usize, pages: usize },
}

impl ScreenerError {
    /// True when the pages disagree with each other rather than failing outright.
    pub fn is_consistency(&self) -> bool {
        matches!(
            self,
            ScreenerError::RowCountMismatch { .. } | ScreenerError::TotalChanged { .. }
        )
    }
}

pub fn page_count(total: usize, page_size: usize) -> usize {
    total.div_ceil(page_size)
}

pub struct Paginator {
    request: RequestSpec,
    page_size: usize,
    limit: Option<usize>,
    fetcher: Arc<dyn Fetcher>,
    parser: Arc<dyn PageParser>,
    limiter: Arc<RateLimiter>,
    timeout: Duration,
    reported_total: Option<usize>,
    records: Vec<Record>,
    pages_fetched: usize,
}

impl Paginator {
    /// `page_size` must be positive; it is fixed by the table being screened.
    pub fn new(
        request: RequestSpec,
        page_size: usize,
        fetcher: Arc<dyn Fetcher>,
        parser: Arc<dyn PageParser>,
        limiter: Arc<RateLimiter>,
        timeout: Duration,
    ) -> Self {
        Self {
            request,
            page_size: page_size.max(1),
            limit: None,
            fetcher,
            parser,
            limiter,
            timeout,
            reported_total: None,
            records: Vec::new(),
            pages_fetched: 0,
        }
    }

    /// Caps the session at `limit` records.
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// The session total, if page 0 has been fetched.
    pub fn total(&self) -> Option<usize> {
        self.reported_total.map(|reported| self.capped(reported))
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Records fetched so far, in rank order.
    pub fn cached(&self) -> &[Record] {
        &self.records
    }

    fn capped(&self, reported: usize) -> usize {
        self.limit.map_or(reported, |limit| reported.min(limit))
    }

    /// Resolves the session total, fetching page 0 on first use.
    pub async fn len(&mut self) -> Result<usize, ScreenerError> {
        if self.reported_total.is_none() {
            self.fetch_next_page().await?;
        }
        Ok(self.total().unwrap_or_default())
    }

    pub async fn page_count(&mut self) -> Result<usize, ScreenerError> {
        let total = self.len().await?;
        Ok(page_count(total, self.page_size))
    }

    async fn fetch_next_page(&mut self) -> Result<(), ScreenerError> {
        let page = self.pages_fetched;
        if let Some(total) = self.total() {
            let pages = page_count(total, self.page_size);
            if page >= pages {
                return Err(ScreenerError::PageOutOfRange {
                    requested: page,
                    pages,
                });
            }
        }

        let offset = page * self.page_size;
        let request = self.request.with_row_offset(offset);

        self.limiter.acquire().await;
        log::debug!("Fetching screener page {} (row offset {})", page, offset);
        let content = with_timeout(self.timeout, self.fetcher.fetch_text(&request))
            .await
            .map_err(|source| ScreenerError::Transport { page, source })?;

        let parsed = self
            .parser
            .parse_screener(&content)
            .map_err(|source| ScreenerError::Parse { page, source })?;

        match self.reported_total {
            Some(expected) if expected != parsed.total => {
                return Err(ScreenerError::TotalChanged {
                    page,
                    expected,
                    found: parsed.total,
                });
            }
            _ => {}
        }

        // The total of a rejected page is never committed.
        let served = self.page_size.min(parsed.total.saturating_sub(offset));
        if parsed.rows.len() != served {
            return Err(ScreenerError::RowCountMismatch {
                page,
                expected: served,
                found: parsed.rows.len(),
            });
        }

        if self.reported_total.is_none() {
            log::info!(
                "Screener reports {} record(s) across {} page(s)",
                parsed.total,
                page_count(parsed.total, self.page_size)
            );
            self.reported_total = Some(parsed.total);
        }

        let wanted = self.page_size.min(self.capped(parsed.total).saturating_sub(offset));
        self.records.extend(
            parsed
                .rows
                .into_iter()
                .take(wanted)
                .enumerate()
                .map(|(i, row)| Record::new(row.ticker, offset + i + 1, row.fields)),
        );
        self.pages_fetched += 1;

        log::info!(
            "Fetched page {}/{} ({} row(s))",
            page + 1,
            page_count(self.total().unwrap_or_default(), self.page_size).max(1),
            wanted
        );
        Ok(())
    }

    /// The record at zero-based `index`, fetching pages up to it as needed.
    pub async fn record_at(&mut self, index: usize) -> Result<Option<Record>, ScreenerError> {
        let total = self.len().await?;
        if index >= total {
            return Ok(None);
        }
        while index >= self.records.len() {
            self.fetch_next_page().await?;
        }
        Ok(self.records.get(index).cloned())
    }

    /// Records of one page, fetching every page before it first.
    pub async fn page(&mut self, page: usize) -> Result<&[Record], ScreenerError> {
        let total = self.len().await?;
        let pages = page_count(total, self.page_size);
        if page >= pages {
            return Err(ScreenerError::PageOutOfRange {
                requested: page,
                pages,
            });
        }
        while self.pages_fetched <= page {
            self.fetch_next_page().await?;
        }
        let start = page * self.page_size;
        let end = (start + self.page_size).min(total);
        Ok(&self.records[start..end])
    }

    /// Lazily yields every record in rank order.
    ///
    /// Pages already fetched are replayed from the cache. The first error
    /// ends the stream.
    pub fn records(&mut self) -> impl Stream<Item = Result<Record, ScreenerError>> + '_ {
        stream::try_unfold((self, 0usize), |(this, index)| async move {
            Ok(this
                .record_at(index)
                .await?
                .map(|record| (record, (this, index + 1))))
        })
    }

    /// Fetches every remaining page and hands out the full record set.
    pub async fn fetch_all(&mut self) -> Result<&mut [Record], ScreenerError> {
        let total = self.len().await?;
        while self.records.len() < total {
            self.fetch_next_page().await?;
        }
        Ok(self.records.as_mut_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeSite, LineParser};
    use futures::{StreamExt, TryStreamExt};

    fn paginator(site: &Arc<FakeSite>, delay: Duration) -> Paginator {
        Paginator::new(
            RequestSpec::new(format!("{}/screener.ashx", crate::testing::BASE)),
            site.page_size,
            site.clone(),
            Arc::new(LineParser),
            Arc::new(RateLimiter::new(delay)),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_page_count() {
        assert_eq!(page_count(0, 20), 0);
        assert_eq!(page_count(1, 20), 1);
        assert_eq!(page_count(20, 20), 1);
        assert_eq!(page_count(21, 20), 2);
        assert_eq!(page_count(45, 20), 3);
    }

    #[tokio::test]
    async fn test_len_fetches_only_first_page_once() {
        let site = Arc::new(FakeSite::new(45, 20));
        let mut pager = paginator(&site, Duration::ZERO);

        assert_eq!(pager.page_size(), 20);
        assert_eq!(pager.pages_fetched(), 0);
        assert_eq!(pager.len().await.unwrap(), 45);
        assert_eq!(pager.len().await.unwrap(), 45);
        assert_eq!(pager.pages_fetched(), 1);
        assert_eq!(site.page_requests(), vec![0]);
    }

    #[tokio::test]
    async fn test_count_invariant_across_iterations() {
        let site = Arc::new(FakeSite::new(45, 20));
        let mut pager = paginator(&site, Duration::ZERO);

        let first: Vec<Record> = pager.records().try_collect().await.unwrap();
        let second: Vec<Record> = pager.records().try_collect().await.unwrap();

        assert_eq!(first.len(), pager.len().await.unwrap());
        assert_eq!(first, second);
        assert_eq!(site.page_requests(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_ranks_form_permutation_in_page_order() {
        let site = Arc::new(FakeSite::new(41, 20));
        let mut pager = paginator(&site, Duration::ZERO);

        let records: Vec<Record> = pager.records().try_collect().await.unwrap();
        let ranks: Vec<usize> = records.iter().map(|r| r.rank).collect();

        assert_eq!(ranks, (1..=41).collect::<Vec<_>>());
        assert_eq!(records[0].ticker, FakeSite::ticker(1));
        assert_eq!(records[40].ticker, FakeSite::ticker(41));
        assert_eq!(records[20].fields.get("Ticker"), Some(FakeSite::ticker(21).as_str()));
    }

    #[tokio::test]
    async fn test_iteration_is_lazy() {
        let site = Arc::new(FakeSite::new(60, 20));
        let mut pager = paginator(&site, Duration::ZERO);

        let taken: Vec<Record> = {
            let stream = pager.records();
            futures::pin_mut!(stream);
            let mut taken = Vec::new();
            while let Some(record) = stream.try_next().await.unwrap() {
                taken.push(record);
                if taken.len() == 21 {
                    break;
                }
            }
            taken
        };

        assert_eq!(taken.len(), 21);
        assert_eq!(site.page_requests(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_empty_session() {
        let site = Arc::new(FakeSite::new(0, 20));
        let mut pager = paginator(&site, Duration::ZERO);

        assert_eq!(pager.len().await.unwrap(), 0);
        let records: Vec<Record> = pager.records().try_collect().await.unwrap();
        assert!(records.is_empty());
        assert_eq!(site.page_requests(), vec![0]);
    }

    #[tokio::test]
    async fn test_exact_multiple_does_not_request_extra_page() {
        let site = Arc::new(FakeSite::new(40, 20));
        let mut pager = paginator(&site, Duration::ZERO);

        let records: Vec<Record> = pager.records().try_collect().await.unwrap();
        assert_eq!(records.len(), 40);
        assert_eq!(site.page_requests(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_page_out_of_range() {
        let site = Arc::new(FakeSite::new(45, 20));
        let mut pager = paginator(&site, Duration::ZERO);

        let err = pager.page(3).await.unwrap_err();
        assert!(matches!(
            err,
            ScreenerError::PageOutOfRange {
                requested: 3,
                pages: 3
            }
        ));

        let last = pager.page(2).await.unwrap();
        assert_eq!(last.len(), 5);
        assert_eq!(last[0].rank, 41);
    }

    #[tokio::test]
    async fn test_transport_failure_aborts_enumeration() {
        let site = Arc::new(FakeSite::new(60, 20).failing_page(1));
        let mut pager = paginator(&site, Duration::ZERO);

        let results: Vec<Result<Record, ScreenerError>> = pager.records().collect().await;

        assert_eq!(results.len(), 21);
        assert!(results[..20].iter().all(Result::is_ok));
        assert!(matches!(
            results[20],
            Err(ScreenerError::Transport { page: 1, .. })
        ));
        assert_eq!(site.page_requests(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_parse_failure_aborts_enumeration() {
        let site = Arc::new(FakeSite::new(30, 20).garbled_page(1));
        let mut pager = paginator(&site, Duration::ZERO);

        let err = pager.fetch_all().await.unwrap_err();
        assert!(matches!(err, ScreenerError::Parse { page: 1, .. }));
        assert!(!err.is_consistency());
    }

    #[tokio::test]
    async fn test_total_change_is_consistency_error() {
        let site = Arc::new(FakeSite::new(45, 20).reported_total_on_page(2, 46));
        let mut pager = paginator(&site, Duration::ZERO);

        let err = pager.fetch_all().await.unwrap_err();
        assert!(matches!(
            err,
            ScreenerError::TotalChanged {
                page: 2,
                expected: 45,
                found: 46
            }
        ));
        assert!(err.is_consistency());
    }

    #[tokio::test]
    async fn test_short_page_is_consistency_error() {
        let site = Arc::new(FakeSite::new(45, 20).rows_on_page(1, 19));
        let mut pager = paginator(&site, Duration::ZERO);

        let err = pager.fetch_all().await.unwrap_err();
        assert!(matches!(
            err,
            ScreenerError::RowCountMismatch {
                page: 1,
                expected: 20,
                found: 19
            }
        ));
    }

    #[tokio::test]
    async fn test_long_page_is_consistency_error() {
        let site = Arc::new(FakeSite::new(45, 20).rows_on_page(1, 21));
        let mut pager = paginator(&site, Duration::ZERO);

        let err = pager.fetch_all().await.unwrap_err();
        assert!(matches!(
            err,
            ScreenerError::RowCountMismatch {
                page: 1,
                expected: 20,
                found: 21
            }
        ));
        assert!(err.is_consistency());
        assert_eq!(pager.cached().len(), 20);
        assert_eq!(pager.pages_fetched(), 1);
    }

    #[tokio::test]
    async fn test_rejected_first_page_leaves_total_unknown() {
        let site = Arc::new(FakeSite::new(45, 20).rows_on_page(0, 21));
        let mut pager = paginator(&site, Duration::ZERO);

        let err = pager.fetch_all().await.unwrap_err();
        assert!(matches!(
            err,
            ScreenerError::RowCountMismatch { page: 0, .. }
        ));
        assert_eq!(pager.total(), None);
        assert!(pager.cached().is_empty());
        assert_eq!(pager.pages_fetched(), 0);

        assert!(matches!(
            pager.len().await,
            Err(ScreenerError::RowCountMismatch { page: 0, .. })
        ));
        assert_eq!(site.page_requests(), vec![0, 0]);
    }

    #[tokio::test]
    async fn test_invalid_url_is_transport_failure() {
        let mut pager = Paginator::new(
            RequestSpec::new("not a url"),
            20,
            Arc::new(crate::fetcher::WebScraper::new().unwrap()),
            Arc::new(LineParser),
            Arc::new(RateLimiter::unlimited()),
            Duration::from_secs(5),
        );

        let err = pager.len().await.unwrap_err();
        assert!(matches!(
            err,
            ScreenerError::Transport {
                page: 0,
                source: TransportError::InvalidUrl(_)
            }
        ));
    }

    #[tokio::test]
    async fn test_limit_caps_session() {
        let site = Arc::new(FakeSite::new(45, 20));
        let mut pager = paginator(&site, Duration::ZERO).with_limit(Some(25));

        let records: Vec<Record> = pager.records().try_collect().await.unwrap();
        assert_eq!(pager.len().await.unwrap(), 25);
        assert_eq!(records.len(), 25);
        assert_eq!(records.last().map(|r| r.rank), Some(25));
        assert_eq!(site.page_requests(), vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_applies_per_page_not_per_record() {
        let site = Arc::new(FakeSite::new(45, 20));
        let mut pager = paginator(&site, Duration::from_secs(2));

        let start = tokio::time::Instant::now();
        let records: Vec<Record> = pager.records().try_collect().await.unwrap();

        assert_eq!(records.len(), 45);
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_timeout_is_fatal() {
        let site = Arc::new(FakeSite::new(45, 20).stalled_page(1));
        let mut pager = paginator(&site, Duration::ZERO);

        let err = pager.fetch_all().await.unwrap_err();
        assert!(matches!(
            err,
            ScreenerError::Transport {
                page: 1,
                source: TransportError::Timeout(_)
            }
        ));
    }
}
