pub mod config;
pub mod endpoints;
pub mod enrich;
pub mod fetcher;
pub mod limiter;
pub mod pagination;
pub mod parser;
pub mod query;
pub mod screener;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::ClientConfig;
pub use endpoints::{EndpointError, get_all_news, get_analyst_price_targets};
pub use enrich::{ChartOptions, ChartReport, DetailReport, DirectoryResolver, OutputResolver};
pub use fetcher::{Fetcher, TransportError, WebScraper};
pub use limiter::RateLimiter;
pub use pagination::ScreenerError;
pub use parser::{FinvizParser, PageParser};
pub use query::{RequestSpec, ScreenerQuery};
pub use screener::{Screener, ScreenerBuilder};
pub use types::{NewsItem, PriceTarget, Record, Table, TickerDetail};

pub(crate) const BASE_URL: &str = "https://finviz.com";
