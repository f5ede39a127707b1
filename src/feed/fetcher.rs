use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

use super::parser::{parse_channel, FetchedChannel};

/// Default per-fetch timeout, covering connect, headers and body
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur during a feed fetch.
///
/// None of these are retried here; the scheduler picks the feed up again on
/// a later tick.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Response status other than 200 OK
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the caller's timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Body is not well-formed RSS
    #[error("Parse error: {0}")]
    Parse(#[from] super::parser::ParseError),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
}

/// Performs one HTTP GET + parse per call.
///
/// Cheap to clone; the underlying `reqwest::Client` pools connections.
#[derive(Debug, Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl FeedFetcher {
    /// Build a fetcher that identifies itself as `gator/<version>`.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("gator/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, timeout))
    }

    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetch and parse the RSS document at `url`.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Network`] - Connection, TLS or body read failure
    /// - [`FetchError::Timeout`] - The whole exchange exceeded the timeout
    /// - [`FetchError::HttpStatus`] - Any status other than 200
    /// - [`FetchError::ResponseTooLarge`] - Body exceeded 10MB
    /// - [`FetchError::Parse`] - Body is not RSS XML
    pub async fn fetch(&self, url: &str) -> Result<FetchedChannel, FetchError> {
        let bytes = tokio::time::timeout(self.timeout, self.download(url))
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))??;

        tracing::trace!(
            url = %url,
            sample = %String::from_utf8_lossy(&bytes[..bytes.len().min(200)]),
            "Fetched feed body"
        );

        Ok(parse_channel(&bytes)?)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        read_limited_bytes(response, MAX_FEED_SIZE).await
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
