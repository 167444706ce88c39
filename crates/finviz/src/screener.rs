use std::sync::Arc;
use std::time::Duration;

use futures::Stream;

use crate::config::ClientConfig;
use crate::enrich::{ChartOptions, ChartReport, DetailReport, Enricher, OutputResolver};
use crate::fetcher::{Fetcher, TransportError, WebScraper};
use crate::limiter::RateLimiter;
use crate::pagination::{Paginator, ScreenerError};
use crate::parser::{FinvizParser, PageParser};
use crate::query::{QueryError, ScreenerQuery};
use crate::types::{Record, Table};

/// One screening session: a fixed query over its full result set.
///
/// Nothing is fetched until the first call that needs data. Records are
/// cached for the lifetime of the session, so iterating twice costs one set
/// of page requests.
pub struct Screener {
    query: ScreenerQuery,
    paginator: Paginator,
    enricher: Enricher,
    chart_options: ChartOptions,
}

impl Screener {
    /// A session against finviz.com with the default client settings.
    pub fn new<I, S>(filters: I, table: Table, delay: Duration) -> Result<Self, TransportError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Screener::builder()
            .query(ScreenerQuery::new(filters, table))
            .delay(delay)
            .build()
    }

    pub fn builder() -> ScreenerBuilder {
        ScreenerBuilder::default()
    }

    pub fn query(&self) -> &ScreenerQuery {
        &self.query
    }

    /// The number of records in the session. Fetches page 0 on first use.
    pub async fn len(&mut self) -> Result<usize, ScreenerError> {
        self.paginator.len().await
    }

    pub async fn is_empty(&mut self) -> Result<bool, ScreenerError> {
        Ok(self.len().await? == 0)
    }

    /// The total once known, without touching the network.
    pub fn total(&self) -> Option<usize> {
        self.paginator.total()
    }

    pub async fn page_count(&mut self) -> Result<usize, ScreenerError> {
        self.paginator.page_count().await
    }

    pub async fn page(&mut self, page: usize) -> Result<&[Record], ScreenerError> {
        self.paginator.page(page).await
    }

    /// Streams records in rank order, fetching pages only as they are reached.
    pub fn records(&mut self) -> impl Stream<Item = Result<Record, ScreenerError>> + '_ {
        self.paginator.records()
    }

    /// Fetches every page and returns the full record set.
    pub async fn collect(&mut self) -> Result<Vec<Record>, ScreenerError> {
        Ok(self.paginator.fetch_all().await?.to_vec())
    }

    /// Records fetched so far, with whatever enrichment they carry.
    pub fn cached(&self) -> &[Record] {
        self.paginator.cached()
    }

    /// Fetches the quote page of every record, one request at a time.
    pub async fn ticker_details(&mut self) -> Result<DetailReport, ScreenerError> {
        let records = self.paginator.fetch_all().await?;
        Ok(self.enricher.fetch_details(records).await)
    }

    /// Downloads the chart of every record into sinks handed out by `resolver`.
    pub async fn charts(
        &mut self,
        concurrency: usize,
        resolver: &dyn OutputResolver,
    ) -> Result<ChartReport, ScreenerError> {
        let records = self.paginator.fetch_all().await?;
        Ok(self
            .enricher
            .fetch_charts(records, concurrency, resolver, &self.chart_options)
            .await)
    }
}

#[derive(Default)]
pub struct ScreenerBuilder {
    query: ScreenerQuery,
    config: ClientConfig,
    limit: Option<usize>,
    fetcher: Option<Arc<dyn Fetcher>>,
    parser: Option<Arc<dyn PageParser>>,
    limiter: Option<Arc<RateLimiter>>,
    chart_options: ChartOptions,
}

impl ScreenerBuilder {
    pub fn filters<I, S>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query.filters = filters.into_iter().map(Into::into).collect();
        self
    }

    pub fn table(mut self, table: Table) -> Self {
        self.query.table = table;
        self
    }

    pub fn order(mut self, order: impl Into<String>) -> Self {
        self.query.order = Some(order.into());
        self
    }

    pub fn signal(mut self, signal: impl Into<String>) -> Self {
        self.query.signal = Some(signal.into());
        self
    }

    pub fn tickers<I, S>(mut self, tickers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query.tickers = tickers.into_iter().map(Into::into).collect();
        self
    }

    pub fn custom_columns(mut self, columns: impl IntoIterator<Item = u32>) -> Self {
        self.query.custom_columns = columns.into_iter().collect();
        self
    }

    pub fn query(mut self, query: ScreenerQuery) -> Self {
        self.query = query;
        self
    }

    /// Starts from a screener URL copied out of a browser.
    pub fn from_url(self, url: &str) -> Result<Self, QueryError> {
        Ok(self.query(ScreenerQuery::from_url(url)?))
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config = self.config.with_base_url(base_url);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config = self.config.with_user_agent(user_agent);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_timeout(timeout);
        self
    }

    /// Minimum spacing between requests. Ignored when a limiter is supplied.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.config = self.config.with_delay(delay);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn parser(mut self, parser: Arc<dyn PageParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Shares a request budget with other sessions.
    pub fn limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn chart_options(mut self, options: ChartOptions) -> Self {
        self.chart_options = options;
        self
    }

    pub fn build(self) -> Result<Screener, TransportError> {
        let fetcher: Arc<dyn Fetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(WebScraper::with_config(&self.config)?),
        };
        let parser = self
            .parser
            .unwrap_or_else(|| Arc::new(FinvizParser) as Arc<dyn PageParser>);
        let limiter = self
            .limiter
            .unwrap_or_else(|| Arc::new(RateLimiter::new(self.config.delay)));

        let request = self.query.build(&self.config.base_url);
        let paginator = Paginator::new(
            request,
            self.query.table.page_size(),
            Arc::clone(&fetcher),
            Arc::clone(&parser),
            Arc::clone(&limiter),
            self.config.timeout,
        )
        .with_limit(self.limit);
        let enricher = Enricher::new(
            fetcher,
            parser,
            limiter,
            self.config.timeout,
            self.config.base_url,
        );

        Ok(Screener {
            query: self.query,
            paginator,
            enricher,
            chart_options: self.chart_options,
        })
    }
}
