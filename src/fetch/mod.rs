pub mod browserless;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::AppError;

pub use browserless::BrowserlessClient;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Source of page HTML for the page capability.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, AppError>;
}

/// Plain HTTP fetch with browser-like headers. No JavaScript rendering.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        let resp = self
            .client
            .get(url)
            .header("Accept", "text/html,application/xhtml+xml,*/*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.5")
            .send()
            .await
            .map_err(|e| AppError::Scrape(format!("request to {url} failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(AppError::Scrape(format!(
                "{url} returned {}",
                resp.status()
            )));
        }

        resp.text()
            .await
            .map_err(|e| AppError::Scrape(format!("failed to read body of {url}: {e}")))
    }
}
