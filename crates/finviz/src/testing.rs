//! In-memory collaborators for exercising the engine without a network.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::fetcher::{Fetcher, TransportError};
use crate::parser::{PageParser, ParseError, ParsedRow, ScreenerPage};
use crate::query::RequestSpec;
use crate::types::{Fields, TickerDetail};

pub(crate) const BASE: &str = "https://finviz.test";

fn param<'a>(request: &'a RequestSpec, key: &str) -> Option<&'a str> {
    request
        .params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// A screener with `total` rows served `page_size` at a time, plus quote and
/// chart endpoints. Every request is recorded.
#[derive(Debug, Default)]
pub(crate) struct FakeSite {
    pub total: usize,
    pub page_size: usize,
    failing_pages: HashSet<usize>,
    garbled_pages: HashSet<usize>,
    stalled_pages: HashSet<usize>,
    total_overrides: HashMap<usize, usize>,
    row_overrides: HashMap<usize, usize>,
    failing_tickers: HashSet<String>,
    stalled_tickers: HashSet<String>,
    chart_latency: Duration,
    page_log: Mutex<Vec<usize>>,
    chart_log: Mutex<Vec<String>>,
    detail_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeSite {
    pub fn new(total: usize, page_size: usize) -> Self {
        Self {
            total,
            page_size,
            ..Default::default()
        }
    }

    pub fn ticker(rank: usize) -> String {
        format!("T{:04}", rank)
    }

    pub fn failing_page(mut self, page: usize) -> Self {
        self.failing_pages.insert(page);
        self
    }

    pub fn garbled_page(mut self, page: usize) -> Self {
        self.garbled_pages.insert(page);
        self
    }

    pub fn stalled_page(mut self, page: usize) -> Self {
        self.stalled_pages.insert(page);
        self
    }

    pub fn reported_total_on_page(mut self, page: usize, total: usize) -> Self {
        self.total_overrides.insert(page, total);
        self
    }

    pub fn rows_on_page(mut self, page: usize, rows: usize) -> Self {
        self.row_overrides.insert(page, rows);
        self
    }

    pub fn failing_ticker(mut self, ticker: impl Into<String>) -> Self {
        self.failing_tickers.insert(ticker.into());
        self
    }

    pub fn stalled_ticker(mut self, ticker: impl Into<String>) -> Self {
        self.stalled_tickers.insert(ticker.into());
        self
    }

    pub fn chart_latency(mut self, latency: Duration) -> Self {
        self.chart_latency = latency;
        self
    }

    pub fn page_requests(&self) -> Vec<usize> {
        self.page_log.lock().unwrap().clone()
    }

    pub fn chart_requests(&self) -> Vec<String> {
        self.chart_log.lock().unwrap().clone()
    }

    pub fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn serve_page(&self, request: &RequestSpec) -> Result<String, TransportError> {
        let offset = param(request, "r")
            .and_then(|r| r.parse::<usize>().ok())
            .map_or(0, |r| r - 1);
        let page = offset / self.page_size;
        self.page_log.lock().unwrap().push(page);

        if self.stalled_pages.contains(&page) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.failing_pages.contains(&page) {
            return Err(TransportError::Status {
                url: request.url.clone(),
                status: 503,
            });
        }
        if self.garbled_pages.contains(&page) {
            return Ok("<html>rate limited</html>".to_string());
        }

        let total = self.total_overrides.get(&page).copied().unwrap_or(self.total);
        let rows = self
            .row_overrides
            .get(&page)
            .copied()
            .unwrap_or_else(|| self.page_size.min(self.total.saturating_sub(offset)));

        let mut body = format!("total:{}\n", total);
        for i in 0..rows {
            body.push_str(&Self::ticker(offset + i + 1));
            body.push('\n');
        }
        Ok(body)
    }

    async fn serve_quote(&self, request: &RequestSpec) -> Result<String, TransportError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        let ticker = param(request, "t").unwrap_or_default();
        if self.stalled_tickers.contains(ticker) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.failing_tickers.contains(ticker) {
            return Err(TransportError::Status {
                url: request.url.clone(),
                status: 404,
            });
        }
        Ok(format!("company:{} Corp", ticker))
    }

    async fn serve_chart(&self, request: &RequestSpec) -> Result<Vec<u8>, TransportError> {
        let ticker = param(request, "t").unwrap_or_default().to_string();
        self.chart_log.lock().unwrap().push(ticker.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.chart_latency.is_zero() {
            tokio::time::sleep(self.chart_latency).await;
        }
        if self.stalled_tickers.contains(&ticker) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_tickers.contains(&ticker) {
            return Err(TransportError::Status {
                url: request.url.clone(),
                status: 500,
            });
        }
        Ok(format!("PNG:{}", ticker).into_bytes())
    }
}

#[async_trait]
impl Fetcher for FakeSite {
    async fn fetch_text(&self, request: &RequestSpec) -> Result<String, TransportError> {
        if request.url.ends_with("/screener.ashx") {
            self.serve_page(request).await
        } else if request.url.ends_with("/quote.ashx") {
            self.serve_quote(request).await
        } else {
            Err(TransportError::Status {
                url: request.url.clone(),
                status: 404,
            })
        }
    }

    async fn fetch_bytes(&self, request: &RequestSpec) -> Result<Vec<u8>, TransportError> {
        if request.url.ends_with("/chart.ashx") {
            self.serve_chart(request).await
        } else {
            Err(TransportError::Status {
                url: request.url.clone(),
                status: 404,
            })
        }
    }
}

/// Reads the plain-text pages served by [`FakeSite`].
#[derive(Debug, Default)]
pub(crate) struct LineParser;

impl PageParser for LineParser {
    fn parse_screener(&self, content: &str) -> Result<ScreenerPage, ParseError> {
        let mut lines = content.lines();
        let total = lines
            .next()
            .and_then(|l| l.strip_prefix("total:"))
            .ok_or_else(|| ParseError::MissingElement("total line".into()))?
            .parse()
            .map_err(|_| ParseError::Number(content.to_string()))?;

        let rows = lines
            .filter(|l| !l.is_empty())
            .map(|ticker| {
                let mut fields = Fields::new();
                fields.push("Ticker", ticker);
                fields.push("Price", "10.00");
                ParsedRow {
                    ticker: ticker.to_string(),
                    fields,
                }
            })
            .collect();

        Ok(ScreenerPage { total, rows })
    }

    fn parse_detail(&self, content: &str) -> Result<TickerDetail, ParseError> {
        let company = content
            .strip_prefix("company:")
            .ok_or_else(|| ParseError::MissingField("company".into()))?;
        Ok(TickerDetail {
            company: Some(company.to_string()),
            ..Default::default()
        })
    }
}

/// Serves fixture files by endpoint path.
#[derive(Debug, Default)]
pub(crate) struct FixtureFetcher {
    routes: HashMap<String, String>,
    requests: Mutex<Vec<RequestSpec>>,
}

impl FixtureFetcher {
    pub fn route(mut self, path: &str, fixture: &str) -> Self {
        let body = std::fs::read_to_string(fixture).expect("Failed to read fixture");
        self.routes.insert(format!("{}{}", BASE, path), body);
        self
    }

    pub fn requests(&self) -> Vec<RequestSpec> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for FixtureFetcher {
    async fn fetch_text(&self, request: &RequestSpec) -> Result<String, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        self.routes
            .get(&request.url)
            .cloned()
            .ok_or_else(|| TransportError::Status {
                url: request.url.clone(),
                status: 404,
            })
    }

    async fn fetch_bytes(&self, request: &RequestSpec) -> Result<Vec<u8>, TransportError> {
        self.fetch_text(request).await.map(String::into_bytes)
    }
}
