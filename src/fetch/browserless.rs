use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::capabilities::google_maps::{FeedBrowser, FeedSession};
use crate::error::AppError;
use crate::fetch::PageFetcher;

/// Puppeteer function run by Browserless: search Maps, then record the
/// article labels visible in the results feed after each scroll.
const MAPS_FEED_FUNCTION: &str = r#"
export default async function ({ page, context }) {
  await page.goto("https://www.google.com/maps", { waitUntil: "domcontentloaded", timeout: 60000 });
  await page.waitForSelector("input#searchboxinput");
  await page.type("input#searchboxinput", context.query);
  await page.keyboard.press("Enter");
  await page.waitForSelector('div[role="feed"]', { timeout: 15000 });

  const snapshots = [];
  for (let i = 0; i <= context.maxScrolls; i++) {
    const labels = await page.$$eval('div[role="feed"] div[role="article"]',
      (els) => els.map((el) => el.getAttribute("aria-label")));
    snapshots.push(labels);
    if (labels.filter(Boolean).length >= context.limit) break;
    await page.$eval('div[role="feed"]', (el) => el.scrollBy(0, 1000));
    await new Promise((resolve) => setTimeout(resolve, 2000));
  }

  return { data: { snapshots }, type: "application/json" };
}
"#;

pub struct BrowserlessClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BrowserlessClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(180))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        let mut endpoint = format!("{}/{path}", self.base_url);
        if let Some(ref token) = self.token {
            endpoint.push_str("?token=");
            endpoint.extend(utf8_percent_encode(token, NON_ALPHANUMERIC));
        }
        endpoint
    }

    async fn post(&self, path: &str, body: &Value) -> Result<reqwest::Response, AppError> {
        let resp = self
            .client
            .post(self.endpoint(path))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                AppError::Scrape(format!("Browserless request failed: {}", e.without_url()))
            })?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(AppError::Scrape(format!(
                "Browserless returned {status}: {message}"
            )));
        }
        Ok(resp)
    }

    /// Fetch fully-rendered HTML content for a URL via the /content endpoint.
    pub async fn content(&self, url: &str) -> Result<String, AppError> {
        self.post("content", &json!({ "url": url }))
            .await?
            .text()
            .await
            .map_err(|e| {
                AppError::Scrape(format!("failed to read rendered page: {}", e.without_url()))
            })
    }
}

#[async_trait]
impl PageFetcher for BrowserlessClient {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        self.content(url).await
    }
}

#[derive(Debug, Deserialize)]
struct FeedResponse {
    snapshots: Vec<Vec<Option<String>>>,
}

#[async_trait]
impl FeedBrowser for BrowserlessClient {
    async fn open(
        &self,
        query: &str,
        limit: u32,
        max_scrolls: u32,
    ) -> Result<Box<dyn FeedSession>, AppError> {
        let body = json!({
            "code": MAPS_FEED_FUNCTION,
            "context": { "query": query, "limit": limit, "maxScrolls": max_scrolls },
        });
        let feed: FeedResponse = self
            .post("function", &body)
            .await?
            .json()
            .await
            .map_err(|e| {
                AppError::Scrape(format!("unexpected feed response: {}", e.without_url()))
            })?;

        tracing::debug!(query, snapshots = feed.snapshots.len(), "Loaded maps feed");
        Ok(Box::new(RecordedFeed::new(feed.snapshots)))
    }
}

/// Replays feed snapshots captured in one browser session, one per scroll.
/// Scrolling past the last snapshot leaves the feed unchanged.
struct RecordedFeed {
    snapshots: Vec<Vec<Option<String>>>,
    position: usize,
}

impl RecordedFeed {
    fn new(snapshots: Vec<Vec<Option<String>>>) -> Self {
        Self {
            snapshots,
            position: 0,
        }
    }
}

#[async_trait]
impl FeedSession for RecordedFeed {
    async fn entries(&mut self) -> Result<Vec<Option<String>>, AppError> {
        Ok(self
            .snapshots
            .get(self.position)
            .cloned()
            .unwrap_or_default())
    }

    async fn scroll(&mut self) -> Result<(), AppError> {
        if self.position + 1 < self.snapshots.len() {
            self.position += 1;
        }
        Ok(())
    }
}
