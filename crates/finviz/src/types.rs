use std::{fmt::Display, str::FromStr};

use chrono::NaiveDate;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, thiserror::Error)]
#[error(
    "Invalid table '{0}'. Accepted values: 'overview', 'valuation', 'ownership', 'performance', 'custom', 'financial', 'technical'"
)]
pub struct TableParseError(String);

/// A screener view. Each one selects a different column set for the same rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    #[default]
    Overview,
    Valuation,
    Ownership,
    Performance,
    Custom,
    Financial,
    Technical,
}

impl Table {
    /// Value of the `v=` query parameter.
    pub fn view_code(&self) -> &'static str {
        match self {
            Table::Overview => "111",
            Table::Valuation => "121",
            Table::Ownership => "131",
            Table::Performance => "141",
            Table::Custom => "152",
            Table::Financial => "161",
            Table::Technical => "171",
        }
    }

    pub fn from_view_code(code: &str) -> Option<Table> {
        match code {
            "111" => Some(Table::Overview),
            "121" => Some(Table::Valuation),
            "131" => Some(Table::Ownership),
            "141" => Some(Table::Performance),
            "151" | "152" => Some(Table::Custom),
            "161" => Some(Table::Financial),
            "171" => Some(Table::Technical),
            _ => None,
        }
    }

    /// Rows served per result page.
    pub fn page_size(&self) -> usize {
        20
    }
}

impl FromStr for Table {
    type Err = TableParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "overview" => Ok(Table::Overview),
            "valuation" => Ok(Table::Valuation),
            "ownership" => Ok(Table::Ownership),
            "performance" => Ok(Table::Performance),
            "custom" => Ok(Table::Custom),
            "financial" => Ok(Table::Financial),
            "technical" => Ok(Table::Technical),
            _ => Err(TableParseError(s.to_string())),
        }
    }
}

impl Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Table::Overview => "Overview",
            Table::Valuation => "Valuation",
            Table::Ownership => "Ownership",
            Table::Performance => "Performance",
            Table::Custom => "Custom",
            Table::Financial => "Financial",
            Table::Technical => "Technical",
        };
        write!(f, "{}", name)
    }
}

/// Column name/value pairs kept in source column order.
///
/// Serializes as a JSON object whose keys follow that order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields(Vec<(String, String)>);

impl Fields {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.0.push((column.into(), value.into()));
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(c, _)| c.eq_ignore_ascii_case(column))
            .map(|(_, v)| v.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(c, _)| c.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(c, v)| (c.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for Fields {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for Fields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (column, value) in &self.0 {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// One screener row.
///
/// `ticker`, `fields` and `rank` are fixed once the owning page is parsed;
/// enrichment only touches `detail`, `detail_error` and `chart_fetched`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub ticker: String,
    pub rank: usize,
    pub fields: Fields,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<TickerDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail_error: Option<String>,
    pub chart_fetched: bool,
}

impl Record {
    pub fn new(ticker: impl Into<String>, rank: usize, fields: Fields) -> Self {
        Self {
            ticker: ticker.into(),
            rank,
            fields,
            detail: None,
            detail_error: None,
            chart_fetched: false,
        }
    }
}

impl Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:>5}. {:<6}", self.rank, self.ticker)?;
        for (column, value) in self.fields.iter() {
            if column.eq_ignore_ascii_case("ticker") || column.eq_ignore_ascii_case("no.") {
                continue;
            }
            write!(f, " | {}: {}", column, value)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\n       {}", detail)?;
        }
        Ok(())
    }
}

/// Parsed quote page for a single ticker.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickerDetail {
    pub company: Option<String>,
    pub description: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub country: Option<String>,
    pub fundamentals: Fields,
}

impl Display for TickerDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let unknown = "n/a";
        write!(
            f,
            "{} [{} / {} / {}] {} fundamental(s)",
            self.company.as_deref().unwrap_or(unknown),
            self.sector.as_deref().unwrap_or(unknown),
            self.industry.as_deref().unwrap_or(unknown),
            self.country.as_deref().unwrap_or(unknown),
            self.fundamentals.len()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTarget {
    pub date: NaiveDate,
    pub category: String,
    pub analyst: String,
    pub rating: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_from: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_to: Option<f64>,
}

impl Display for PriceTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {:<12} {:<24} {}",
            self.date, self.category, self.analyst, self.rating
        )?;
        match (self.price_from, self.price_to) {
            (Some(from), Some(to)) => write!(f, " (${:.2} → ${:.2})", from, to),
            (None, Some(to)) => write!(f, " (${:.2})", to),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsItem {
    pub time: String,
    pub headline: String,
    pub url: String,
    pub source: Option<String>,
}

impl Display for NewsItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.time, self.headline)?;
        if let Some(source) = &self.source {
            write!(f, " ({})", source)?;
        }
        Ok(())
    }
}
