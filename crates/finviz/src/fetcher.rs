use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::config::ClientConfig;
use crate::query::{QueryError, RequestSpec};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected status {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    InvalidUrl(#[from] QueryError),
}

/// Executes one request and hands back the raw body.
///
/// Implementations must not retry; retry policy belongs to the caller.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch_text(&self, request: &RequestSpec) -> Result<String, TransportError>;

    async fn fetch_bytes(&self, request: &RequestSpec) -> Result<Vec<u8>, TransportError>;
}

/// Bounds a single fetch, whatever the underlying transport does.
pub(crate) async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(timeout)),
    }
}

#[derive(Debug, Clone)]
pub struct WebScraper {
    client: Client,
}

impl WebScraper {
    pub fn new() -> Result<Self, TransportError> {
        Self::with_config(&ClientConfig::default())
    }

    pub fn with_config(config: &ClientConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self { client })
    }

    async fn get(&self, request: &RequestSpec) -> Result<reqwest::Response, TransportError> {
        let url = request.to_url()?;
        log::debug!("GET {}", url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .inspect_err(|e| log::error!("HTTP error: {e:?}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Fetcher for WebScraper {
    async fn fetch_text(&self, request: &RequestSpec) -> Result<String, TransportError> {
        Ok(self
            .get(request)
            .await?
            .text()
            .await
            .inspect_err(|e| log::error!("Decode error: {e:?}"))?)
    }

    async fn fetch_bytes(&self, request: &RequestSpec) -> Result<Vec<u8>, TransportError> {
        Ok(self
            .get(request)
            .await?
            .bytes()
            .await
            .inspect_err(|e| log::error!("Decode error: {e:?}"))?
            .to_vec())
    }
}
