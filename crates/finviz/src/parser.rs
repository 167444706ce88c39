use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::types::{Fields, NewsItem, PriceTarget, TickerDetail};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Missing element: {0}")]
    MissingElement(String),
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Invalid number: {0}")]
    Number(String),
    #[error("Failed to parse date: {0}")]
    DateParse(String),
    #[error("Row {row} has {found} cell(s), header has {expected}")]
    ColumnMismatch {
        row: usize,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    pub ticker: String,
    pub fields: Fields,
}

/// One screener result page as served: the session-wide total plus this page's rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenerPage {
    pub total: usize,
    pub rows: Vec<ParsedRow>,
}

/// Turns raw page bodies into typed results.
pub trait PageParser: Send + Sync {
    fn parse_screener(&self, content: &str) -> Result<ScreenerPage, ParseError>;

    fn parse_detail(&self, content: &str) -> Result<TickerDetail, ParseError>;
}

/// Parser for the HTML served by finviz.com.
#[derive(Debug, Clone, Copy, Default)]
pub struct FinvizParser;

impl PageParser for FinvizParser {
    fn parse_screener(&self, content: &str) -> Result<ScreenerPage, ParseError> {
        parse_screener_page(content)
    }

    fn parse_detail(&self, content: &str) -> Result<TickerDetail, ParseError> {
        parse_quote_detail(content)
    }
}

static RE_TOTAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Total:\s*([\d,]+)|([\d,]+)\s*Total").expect("invalid regex: total")
});

static SEL_TOTAL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("#screener-total, .count-text").expect("selector: total"));
static SEL_SCREENER_TABLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table.screener_table").expect("selector: screener table"));
static SEL_TH: LazyLock<Selector> = LazyLock::new(|| Selector::parse("th").expect("selector: th"));
static SEL_TD: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").expect("selector: td"));
static SEL_BODY_ROW: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tbody tr").expect("selector: tbody tr"));

static SEL_COMPANY: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".quote-header_ticker-wrapper_company, .fullview-title b")
        .expect("selector: company")
});
static SEL_PROFILE: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".quote_profile-bio, td.fullview-profile").expect("selector: profile")
});
static SEL_QUOTE_LINKS: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".quote-links a.tab-link, td.fullview-links a.tab-link")
        .expect("selector: quote links")
});
static SEL_SNAPSHOT_ROW: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("table.snapshot-table2 tr").expect("selector: snapshot rows")
});

static SEL_RATINGS_ROW: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("table.js-table-ratings tr, table.fullview-ratings-inner tr")
        .expect("selector: ratings rows")
});

static SEL_NEWS_ROW: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tr.news_table-row, tr.nn").expect("selector: news rows"));
static SEL_NEWS_TIME: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("td.news_date-cell, td.nn-date").expect("selector: news time")
});
static SEL_NEWS_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.nn-tab-link").expect("selector: news link"));
static SEL_NEWS_SOURCE: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".news_link-cell_source, .nn-source").expect("selector: news source")
});

fn elem_text(element: ElementRef) -> String {
    element.text().collect::<String>()
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() { None } else { Some(text) }
}

fn parse_count(text: &str) -> Result<usize, ParseError> {
    text.replace(',', "")
        .parse()
        .map_err(|_| ParseError::Number(text.to_string()))
}

fn parse_total(document: &Html) -> Result<usize, ParseError> {
    let text = document
        .select(&SEL_TOTAL)
        .map(|e| normalize_whitespace(&elem_text(e)))
        .find(|t| RE_TOTAL.is_match(t))
        .ok_or_else(|| ParseError::MissingElement("screener total count".into()))?;

    let caps = RE_TOTAL
        .captures(&text)
        .ok_or_else(|| ParseError::MissingField(format!("total in '{}'", text)))?;
    let count = caps
        .get(1)
        .or_else(|| caps.get(2))
        .ok_or_else(|| ParseError::MissingField(format!("total in '{}'", text)))?;
    parse_count(count.as_str())
}

/// Parses a screener result page into its reported total and ordered rows.
///
/// A page reporting a non-zero total must carry the results table; a zero
/// total with no table is an empty result set.
pub fn parse_screener_page(html: &str) -> Result<ScreenerPage, ParseError> {
    let document = Html::parse_document(html);
    let total = parse_total(&document)?;

    let Some(table) = document.select(&SEL_SCREENER_TABLE).next() else {
        if total == 0 {
            return Ok(ScreenerPage {
                total,
                rows: Vec::new(),
            });
        }
        return Err(ParseError::MissingElement("screener results table".into()));
    };

    let headers: Vec<String> = table
        .select(&SEL_TH)
        .map(|th| normalize_whitespace(&elem_text(th)))
        .collect();
    let ticker_idx = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case("ticker"))
        .ok_or_else(|| ParseError::MissingField("Ticker column".into()))?;

    let mut rows = Vec::new();
    for (i, tr) in table.select(&SEL_BODY_ROW).enumerate() {
        let cells: Vec<String> = tr
            .select(&SEL_TD)
            .map(|td| normalize_whitespace(&elem_text(td)))
            .collect();
        if cells.is_empty() {
            continue;
        }
        if cells.len() != headers.len() {
            return Err(ParseError::ColumnMismatch {
                row: i + 1,
                expected: headers.len(),
                found: cells.len(),
            });
        }

        let ticker = cells[ticker_idx].clone();
        if ticker.is_empty() {
            return Err(ParseError::MissingField(format!("ticker in row {}", i + 1)));
        }

        rows.push(ParsedRow {
            ticker,
            fields: headers.iter().cloned().zip(cells).collect(),
        });
    }

    Ok(ScreenerPage { total, rows })
}

/// Parses a quote page into the company profile and snapshot fundamentals.
pub fn parse_quote_detail(html: &str) -> Result<TickerDetail, ParseError> {
    let document = Html::parse_document(html);

    let company = document
        .select(&SEL_COMPANY)
        .next()
        .and_then(|e| non_empty(normalize_whitespace(&elem_text(e))));

    let description = document
        .select(&SEL_PROFILE)
        .next()
        .and_then(|e| non_empty(normalize_whitespace(&elem_text(e))));

    // sector, industry, country, exchange
    let mut links = document
        .select(&SEL_QUOTE_LINKS)
        .map(|e| normalize_whitespace(&elem_text(e)))
        .filter(|t| !t.is_empty());
    let sector = links.next();
    let industry = links.next();
    let country = links.next();

    let mut fundamentals = Fields::new();
    for tr in document.select(&SEL_SNAPSHOT_ROW) {
        let cells: Vec<String> = tr
            .select(&SEL_TD)
            .map(|td| normalize_whitespace(&elem_text(td)))
            .collect();
        for pair in cells.chunks_exact(2) {
            if !pair[0].is_empty() {
                fundamentals.push(pair[0].clone(), pair[1].clone());
            }
        }
    }

    if company.is_none() && fundamentals.is_empty() {
        return Err(ParseError::MissingElement("quote snapshot".into()));
    }

    Ok(TickerDetail {
        company,
        description,
        sector,
        industry,
        country,
        fundamentals,
    })
}

fn parse_rating_date(text: &str) -> Result<NaiveDate, ParseError> {
    NaiveDate::parse_from_str(text, "%b-%d-%y")
        .or_else(|_| NaiveDate::parse_from_str(text, "%Y-%m-%d"))
        .map_err(|_| ParseError::DateParse(text.to_string()))
}

fn parse_price(text: &str) -> Result<f64, ParseError> {
    let cleaned = text.replace(['$', ','], "");
    cleaned
        .trim()
        .parse()
        .map_err(|_| ParseError::Number(text.to_string()))
}

/// "$150 → $200" gives both ends, a single price is the new target.
fn parse_price_range(text: &str) -> Result<(Option<f64>, Option<f64>), ParseError> {
    let text = text.replace("->", "→");
    let parts: Vec<&str> = text
        .split('→')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    match parts.as_slice() {
        [] => Ok((None, None)),
        [to] => Ok((None, Some(parse_price(to)?))),
        [from, to] => Ok((Some(parse_price(from)?), Some(parse_price(to)?))),
        _ => Err(ParseError::Number(text.to_string())),
    }
}

/// Parses the analyst ratings table of a quote page, newest first.
pub fn parse_price_targets(html: &str, last_ratings: usize) -> Result<Vec<PriceTarget>, ParseError> {
    let document = Html::parse_document(html);

    let mut targets = Vec::new();
    for tr in document.select(&SEL_RATINGS_ROW) {
        if targets.len() >= last_ratings {
            break;
        }
        let cells: Vec<String> = tr
            .select(&SEL_TD)
            .map(|td| normalize_whitespace(&elem_text(td)))
            .collect();
        if cells.len() < 4 {
            continue;
        }

        let (price_from, price_to) = match cells.get(4) {
            Some(price) => parse_price_range(price)?,
            None => (None, None),
        };

        targets.push(PriceTarget {
            date: parse_rating_date(&cells[0])?,
            category: cells[1].clone(),
            analyst: cells[2].clone(),
            rating: cells[3].replace("->", "→"),
            price_from,
            price_to,
        });
    }

    Ok(targets)
}

/// Parses the market news page.
pub fn parse_news(html: &str) -> Result<Vec<NewsItem>, ParseError> {
    let document = Html::parse_document(html);

    let mut items = Vec::new();
    for tr in document.select(&SEL_NEWS_ROW) {
        let Some(link) = tr.select(&SEL_NEWS_LINK).next() else {
            continue;
        };
        let Some(url) = link.value().attr("href") else {
            continue;
        };
        let headline = normalize_whitespace(&elem_text(link));
        if headline.is_empty() {
            continue;
        }

        let time = tr
            .select(&SEL_NEWS_TIME)
            .next()
            .map(|e| normalize_whitespace(&elem_text(e)))
            .unwrap_or_default();
        let source = tr
            .select(&SEL_NEWS_SOURCE)
            .next()
            .and_then(|e| non_empty(normalize_whitespace(&elem_text(e))));

        items.push(NewsItem {
            time,
            headline,
            url: url.to_string(),
            source,
        });
    }

    if items.is_empty() {
        return Err(ParseError::MissingElement("news rows".into()));
    }
    Ok(items)
}
