use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::Value;

use crate::capabilities::{Capability, ItemOutcome, ScrapeSummary};
use crate::error::AppError;
use crate::models::record::{NewRecord, RecordKey};
use crate::store::RecordSink;

pub const SOURCE: &str = "google_maps";
const SEARCH_URL: &str = "https://www.google.com/maps/search";

/// Consecutive scrolls without a new label before the feed counts as exhausted.
pub const STALL_LIMIT: u32 = 3;

/// Opens a dynamically loaded results feed for a search query.
#[async_trait]
pub trait FeedBrowser: Send + Sync {
    async fn open(
        &self,
        query: &str,
        limit: u32,
        max_scrolls: u32,
    ) -> Result<Box<dyn FeedSession>, AppError>;
}

#[async_trait]
pub trait FeedSession: Send {
    /// Labels of the entries loaded so far, in feed order. Entries without a
    /// label (ads, spacers) are `None`.
    async fn entries(&mut self) -> Result<Vec<Option<String>>, AppError>;

    async fn scroll(&mut self) -> Result<(), AppError>;
}

/// Scroll-and-extract over a Maps search feed. One record per distinct
/// label, keyed by (label, query).
pub struct GoogleMapsCapability {
    browser: Arc<dyn FeedBrowser>,
    sink: Arc<dyn RecordSink>,
    default_limit: u32,
    max_scroll_attempts: u32,
}

impl GoogleMapsCapability {
    pub fn new(
        browser: Arc<dyn FeedBrowser>,
        sink: Arc<dyn RecordSink>,
        default_limit: u32,
        max_scroll_attempts: u32,
    ) -> Self {
        Self {
            browser,
            sink,
            default_limit,
            max_scroll_attempts,
        }
    }

    fn limit(&self, payload: &Value) -> Result<u32, AppError> {
        let limit = match payload.get("limit") {
            None | Some(Value::Null) => return Ok(self.default_limit),
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
            Some(_) => None,
        };
        match limit {
            Some(n) if n > 0 => Ok(u32::try_from(n).unwrap_or(u32::MAX)),
            _ => Err(AppError::Validation(format!(
                "google_maps limit must be a positive integer, got {}",
                payload["limit"]
            ))),
        }
    }
}

#[async_trait]
impl Capability for GoogleMapsCapability {
    fn job_type(&self) -> &'static str {
        "google_maps"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["query"]
    }

    async fn run(&self, payload: &Value) -> Result<ScrapeSummary, AppError> {
        let query = payload
            .get("query")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .ok_or_else(|| AppError::Validation("google_maps query must be a string".to_string()))?
            .to_string();
        let limit = self.limit(payload)?;

        let mut session = self
            .browser
            .open(&query, limit, self.max_scroll_attempts)
            .await?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut summary = ScrapeSummary::default();
        // Feed entries are append-only; unlabeled entries are tallied once.
        let mut processed = 0;
        let mut scrolls = 0;
        let mut stalled = 0;

        'feed: loop {
            let entries = session.entries().await?;
            let loaded = entries.len();
            let mut new_labels = 0;

            for (index, entry) in entries.into_iter().enumerate() {
                let outcome = match entry.map(|l| l.trim().to_string()) {
                    Some(label) if !label.is_empty() => {
                        if !seen.insert(label.clone()) {
                            continue;
                        }
                        new_labels += 1;
                        ItemOutcome::Extracted(listing_record(&label, &query))
                    }
                    _ if index < processed => continue,
                    _ => ItemOutcome::Skipped("entry without label".to_string()),
                };
                summary.absorb(self.sink.as_ref(), outcome).await?;
                if seen.len() >= limit as usize {
                    break 'feed;
                }
            }
            processed = processed.max(loaded);

            stalled = if new_labels == 0 { stalled + 1 } else { 0 };
            if stalled >= STALL_LIMIT || scrolls >= self.max_scroll_attempts {
                tracing::info!(
                    query = %query,
                    captured = seen.len(),
                    limit,
                    scrolls,
                    "Feed stopped yielding before reaching limit"
                );
                break;
            }

            session.scroll().await?;
            scrolls += 1;
            tracing::debug!(query = %query, captured = seen.len(), limit, "Scrolled feed");
        }

        Ok(summary)
    }
}

fn listing_record(label: &str, query: &str) -> NewRecord {
    NewRecord {
        key: RecordKey::Listing {
            title: label.to_string(),
            query: query.to_string(),
        },
        title: Some(label.to_string()),
        url: Some(format!(
            "{SEARCH_URL}/{}",
            utf8_percent_encode(label, NON_ALPHANUMERIC)
        )),
        price: None,
        raw_html: None,
        source: SOURCE.to_string(),
        job_query: Some(query.to_string()),
        scraped_at: Utc::now(),
    }
}
