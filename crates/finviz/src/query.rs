use reqwest::Url;

use crate::types::Table;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Unknown screener view '{0}'")]
    UnknownView(String),
}

/// A fully built request: target URL plus ordered query parameters.
///
/// Reused across every page of a session; only the row offset changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSpec {
    pub url: String,
    pub params: Vec<(String, String)>,
}

impl RequestSpec {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// finviz addresses pages by the 1-based row they start at (`r=`).
    pub fn with_row_offset(&self, offset: usize) -> RequestSpec {
        let mut spec = self.clone();
        spec.params.retain(|(k, _)| k != "r");
        if offset > 0 {
            spec.params.push(("r".to_string(), (offset + 1).to_string()));
        }
        spec
    }

    pub fn to_url(&self) -> Result<Url, QueryError> {
        Url::parse_with_params(&self.url, &self.params).map_err(|e| QueryError::InvalidUrl {
            url: self.url.clone(),
            reason: e.to_string(),
        })
    }
}

/// Filter tokens and table selection for a screener session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScreenerQuery {
    pub filters: Vec<String>,
    pub table: Table,
    pub order: Option<String>,
    pub signal: Option<String>,
    pub tickers: Vec<String>,
    /// Column ids for the custom table (`c=`).
    pub custom_columns: Vec<u32>,
}

impl ScreenerQuery {
    pub fn new<I, S>(filters: I, table: Table) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            filters: filters.into_iter().map(Into::into).collect(),
            table,
            ..Default::default()
        }
    }

    pub fn build(&self, base_url: &str) -> RequestSpec {
        let mut spec = RequestSpec::new(format!("{}/screener.ashx", base_url))
            .param("v", self.table.view_code());

        if !self.filters.is_empty() {
            spec = spec.param("f", self.filters.join(","));
        }
        if let Some(order) = &self.order {
            spec = spec.param("o", order.as_str());
        }
        if let Some(signal) = &self.signal {
            spec = spec.param("s", signal.as_str());
        }
        if !self.tickers.is_empty() {
            spec = spec.param("t", self.tickers.join(","));
        }
        if self.table == Table::Custom && !self.custom_columns.is_empty() {
            let columns = self
                .custom_columns
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(",");
            spec = spec.param("c", columns);
        }
        spec
    }

    /// Rebuilds a query from a screener URL copied out of a browser.
    pub fn from_url(url: &str) -> Result<Self, QueryError> {
        let parsed = Url::parse(url).map_err(|e| QueryError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let mut query = ScreenerQuery::default();
        for (key, value) in parsed.query_pairs() {
            let split = || {
                value
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            };
            match key.as_ref() {
                "v" => {
                    query.table = Table::from_view_code(&value)
                        .ok_or_else(|| QueryError::UnknownView(value.to_string()))?;
                }
                "f" => query.filters = split(),
                "o" => query.order = Some(value.to_string()),
                "s" => query.signal = Some(value.to_string()),
                "t" => query.tickers = split(),
                "c" => {
                    query.custom_columns = value
                        .split(',')
                        .filter_map(|c| c.trim().parse().ok())
                        .collect()
                }
                _ => log::debug!("Ignoring screener URL parameter '{}'", key),
            }
        }
        Ok(query)
    }
}
