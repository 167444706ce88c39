//! Single-request scrapers that live outside a screening session.

use crate::config::ClientConfig;
use crate::fetcher::{Fetcher, TransportError, WebScraper, with_timeout};
use crate::parser::{ParseError, parse_news, parse_price_targets};
use crate::query::RequestSpec;
use crate::types::{NewsItem, PriceTarget};

/// finviz shows the five most recent ratings unless asked otherwise.
pub const DEFAULT_LAST_RATINGS: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// The `last_ratings` most recent analyst ratings of `ticker`.
pub async fn get_analyst_price_targets(
    ticker: &str,
    last_ratings: usize,
) -> Result<Vec<PriceTarget>, EndpointError> {
    let config = ClientConfig::default();
    let scraper = WebScraper::new()?;
    get_analyst_price_targets_with(&scraper, &config, ticker, last_ratings).await
}

pub async fn get_analyst_price_targets_with(
    fetcher: &dyn Fetcher,
    config: &ClientConfig,
    ticker: &str,
    last_ratings: usize,
) -> Result<Vec<PriceTarget>, EndpointError> {
    let request = RequestSpec::new(format!("{}/quote.ashx", config.base_url)).param("t", ticker);
    let html = with_timeout(config.timeout, fetcher.fetch_text(&request)).await?;

    let targets = parse_price_targets(&html, last_ratings)?;
    log::info!("Fetched {} rating(s) for {}", targets.len(), ticker);
    Ok(targets)
}

/// Every headline on the market news page.
pub async fn get_all_news() -> Result<Vec<NewsItem>, EndpointError> {
    let config = ClientConfig::default();
    let scraper = WebScraper::new()?;
    get_all_news_with(&scraper, &config).await
}

pub async fn get_all_news_with(
    fetcher: &dyn Fetcher,
    config: &ClientConfig,
) -> Result<Vec<NewsItem>, EndpointError> {
    let request = RequestSpec::new(format!("{}/news.ashx", config.base_url));
    let html = with_timeout(config.timeout, fetcher.fetch_text(&request)).await?;

    let news = parse_news(&html)?;
    log::info!("Fetched {} news item(s)", news.len());
    Ok(news)
}
