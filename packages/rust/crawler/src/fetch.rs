//! Document fetching over HTTP.
//!
//! [`DocumentFetcher`] is the seam between the scraper and the network: the
//! listing and every detail page go through it, and tests swap in in-memory
//! implementations.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use htc_shared::{HtcError, Result};

/// User-Agent string for scrape requests.
const USER_AGENT: &str = concat!("htc/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects followed per request.
const MAX_REDIRECTS: usize = 5;

/// Retrieves raw documents by URL.
///
/// Implementations must bound every call with a timeout and report a
/// non-success status as [`HtcError::Status`], distinct from
/// [`HtcError::Transport`].
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    /// Fetch the body of `url` as text.
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// [`DocumentFetcher`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Build a fetcher whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(timeout)
            .build()
            .map_err(|e| HtcError::transport("-", format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Build a fetcher with the timeout given in whole seconds.
    pub fn with_timeout_secs(secs: u64) -> Result<Self> {
        Self::new(Duration::from_secs(secs))
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        debug!(url, "fetching document");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| HtcError::transport(url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HtcError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| HtcError::transport(url, format!("body read failed: {e}")))
    }
}
