//! Secondary per-record fetches: quote details one at a time, chart images
//! through a bounded pool.
//!
//! Neither operation fails as a whole. Each record gets exactly one outcome and
//! failures are handed back alongside the successes.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::fetcher::{Fetcher, TransportError, with_timeout};
use crate::limiter::RateLimiter;
use crate::parser::{PageParser, ParseError};
use crate::query::RequestSpec;
use crate::types::{Record, TickerDetail};

#[derive(Debug, thiserror::Error)]
pub enum FailureCause {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("parse: {0}")]
    Parse(#[from] ParseError),
    #[error("write: {0}")]
    Write(#[from] std::io::Error),
}

/// A failed enrichment of a single record.
#[derive(Debug, thiserror::Error)]
#[error("{ticker} (rank {rank}): {cause}")]
pub struct ItemFailure {
    pub ticker: String,
    pub rank: usize,
    #[source]
    pub cause: FailureCause,
}

/// One entry per input record, in input order.
#[derive(Debug)]
pub struct DetailReport {
    pub results: Vec<Result<TickerDetail, ItemFailure>>,
}

impl DetailReport {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemFailure> {
        self.results.iter().filter_map(|r| r.as_ref().err())
    }
}

impl IntoIterator for DetailReport {
    type Item = Result<TickerDetail, ItemFailure>;
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

/// Summary returned once every chart download has finished.
#[derive(Debug, Default)]
pub struct ChartReport {
    pub attempted: usize,
    /// Sorted by rank.
    pub failures: Vec<ItemFailure>,
}

impl ChartReport {
    pub fn succeeded(&self) -> usize {
        self.attempted - self.failures.len()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    #[default]
    Candle,
    Line,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartPeriod {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartOptions {
    pub chart_type: ChartType,
    pub period: ChartPeriod,
    pub technical_analysis: bool,
}

impl Default for ChartOptions {
    fn default() -> Self {
        Self {
            chart_type: ChartType::Candle,
            period: ChartPeriod::Daily,
            technical_analysis: true,
        }
    }
}

impl ChartOptions {
    pub fn request(&self, base_url: &str, ticker: &str) -> RequestSpec {
        let chart_type = match self.chart_type {
            ChartType::Candle => "c",
            ChartType::Line => "l",
        };
        let period = match self.period {
            ChartPeriod::Daily => "d",
            ChartPeriod::Weekly => "w",
            ChartPeriod::Monthly => "m",
        };
        RequestSpec::new(format!("{}/chart.ashx", base_url))
            .param("t", ticker)
            .param("ty", chart_type)
            .param("ta", if self.technical_analysis { "1" } else { "0" })
            .param("p", period)
    }
}

pub type ChartSink = Pin<Box<dyn AsyncWrite + Send>>;

/// Decides where the chart of a ticker is written.
#[async_trait]
pub trait OutputResolver: Send + Sync {
    async fn resolve(&self, ticker: &str) -> std::io::Result<ChartSink>;

    /// Called once the sink of `ticker` failed mid-write and has been dropped.
    async fn discard(&self, _ticker: &str) -> std::io::Result<()> {
        Ok(())
    }
}

/// Writes `<dir>/<ticker>.<extension>`, creating the directory on demand.
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    dir: PathBuf,
    extension: String,
}

impl DirectoryResolver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            extension: "png".to_string(),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, ticker: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", ticker, self.extension))
    }
}

#[async_trait]
impl OutputResolver for DirectoryResolver {
    async fn resolve(&self, ticker: &str) -> std::io::Result<ChartSink> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let file = tokio::fs::File::create(self.path_for(ticker)).await?;
        Ok(Box::pin(file))
    }

    /// Removes the truncated file a failed write left behind.
    async fn discard(&self, ticker: &str) -> std::io::Result<()> {
        match tokio::fs::remove_file(self.path_for(ticker)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

pub struct Enricher {
    fetcher: Arc<dyn Fetcher>,
    parser: Arc<dyn PageParser>,
    limiter: Arc<RateLimiter>,
    timeout: Duration,
    base_url: String,
}

impl Enricher {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        parser: Arc<dyn PageParser>,
        limiter: Arc<RateLimiter>,
        timeout: Duration,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            parser,
            limiter,
            timeout,
            base_url: base_url.into(),
        }
    }

    fn detail_request(&self, ticker: &str) -> RequestSpec {
        RequestSpec::new(format!("{}/quote.ashx", self.base_url)).param("t", ticker)
    }

    async fn fetch_detail(&self, ticker: &str) -> Result<TickerDetail, FailureCause> {
        let request = self.detail_request(ticker);
        self.limiter.acquire().await;
        let html = with_timeout(self.timeout, self.fetcher.fetch_text(&request)).await?;
        Ok(self.parser.parse_detail(&html)?)
    }

    /// Fetches quote details sequentially and attaches them to the records.
    ///
    /// Records that already carry a detail are reported from it without a
    /// new request.
    pub async fn fetch_details(&self, records: &mut [Record]) -> DetailReport {
        log::info!("Fetching details for {} record(s)...", records.len());

        let mut results = Vec::with_capacity(records.len());
        for record in records.iter_mut() {
            if let Some(detail) = &record.detail {
                results.push(Ok(detail.clone()));
                continue;
            }

            match self.fetch_detail(&record.ticker).await {
                Ok(detail) => {
                    record.detail = Some(detail.clone());
                    record.detail_error = None;
                    results.push(Ok(detail));
                }
                Err(cause) => {
                    log::warn!("Failed to fetch detail for {}: {}", record.ticker, cause);
                    record.detail_error = Some(cause.to_string());
                    results.push(Err(ItemFailure {
                        ticker: record.ticker.clone(),
                        rank: record.rank,
                        cause,
                    }));
                }
            }
        }

        let report = DetailReport { results };
        log::info!(
            "Fetched {} detail(s), {} failed",
            report.succeeded(),
            report.failed()
        );
        report
    }

    async fn download_chart(
        &self,
        ticker: &str,
        resolver: &dyn OutputResolver,
        options: &ChartOptions,
    ) -> Result<(), FailureCause> {
        let request = options.request(&self.base_url, ticker);
        let bytes = with_timeout(self.timeout, self.fetcher.fetch_bytes(&request)).await?;

        let mut sink = resolver.resolve(ticker).await?;
        let written = async {
            sink.write_all(&bytes).await?;
            sink.shutdown().await
        }
        .await;
        if let Err(e) = written {
            drop(sink);
            if let Err(cleanup) = resolver.discard(ticker).await {
                log::warn!("Failed to discard partial chart for {}: {}", ticker, cleanup);
            }
            return Err(e.into());
        }
        log::debug!("Saved chart for {} ({} bytes)", ticker, bytes.len());
        Ok(())
    }

    /// Downloads one chart per record with at most `concurrency` in flight.
    ///
    /// Returns after every download has finished. Each task works on its own
    /// copy of the ticker and rank; records are only marked once the pool has
    /// drained.
    pub async fn fetch_charts(
        &self,
        records: &mut [Record],
        concurrency: usize,
        resolver: &dyn OutputResolver,
        options: &ChartOptions,
    ) -> ChartReport {
        let concurrency = concurrency.max(1);
        log::info!(
            "Downloading {} chart(s) with {} worker(s)...",
            records.len(),
            concurrency
        );

        let tasks: Vec<(usize, String, usize)> = records
            .iter()
            .enumerate()
            .map(|(index, r)| (index, r.ticker.clone(), r.rank))
            .collect();

        let outcomes: Vec<(usize, Result<(), ItemFailure>)> = stream::iter(tasks)
            .map(|(index, ticker, rank)| async move {
                let outcome = self.download_chart(&ticker, resolver, options).await;
                (index, outcome.map_err(|cause| ItemFailure { ticker, rank, cause }))
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut report = ChartReport {
            attempted: outcomes.len(),
            failures: Vec::new(),
        };
        for (index, result) in outcomes {
            records[index].chart_fetched = true;
            if let Err(failure) = result {
                log::warn!("Failed to download chart: {}", failure);
                report.failures.push(failure);
            }
        }
        report.failures.sort_by_key(|f| f.rank);

        log::info!(
            "Downloaded {} chart(s), {} failed",
            report.succeeded(),
            report.failures.len()
        );
        report
    }
}
