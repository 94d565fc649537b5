use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::capabilities::{Capability, ItemOutcome, ScrapeSummary, parse_params};
use crate::error::AppError;
use crate::fetch::PageFetcher;
use crate::models::record::{NewRecord, RecordKey};
use crate::store::RecordSink;

#[derive(Debug, Deserialize)]
pub struct SimpleParams {
    pub url: String,
    pub selectors: ItemSelectors,
}

#[derive(Debug, Deserialize)]
pub struct ItemSelectors {
    pub item: String,
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub price: Option<String>,
}

struct CompiledSelectors {
    item: Selector,
    title: Selector,
    link: Selector,
    price: Option<Selector>,
}

impl CompiledSelectors {
    fn compile(selectors: &ItemSelectors) -> Result<Self, AppError> {
        Ok(Self {
            item: compile("item", &selectors.item)?,
            title: compile("title", &selectors.title)?,
            link: compile("link", &selectors.link)?,
            price: selectors
                .price
                .as_deref()
                .map(|s| compile("price", s))
                .transpose()?,
        })
    }
}

fn compile(name: &str, selector: &str) -> Result<Selector, AppError> {
    Selector::parse(selector).map_err(|e| {
        AppError::Validation(format!("invalid {name} selector '{selector}': {e}"))
    })
}

/// Visits one page and writes a record per element matching `selectors.item`,
/// keyed by the item's resolved link.
pub struct SimpleCapability {
    fetcher: Arc<dyn PageFetcher>,
    sink: Arc<dyn RecordSink>,
}

impl SimpleCapability {
    pub fn new(fetcher: Arc<dyn PageFetcher>, sink: Arc<dyn RecordSink>) -> Self {
        Self { fetcher, sink }
    }
}

#[async_trait]
impl Capability for SimpleCapability {
    fn job_type(&self) -> &'static str {
        "simple"
    }

    fn required_fields(&self) -> &'static [&'static str] {
        &["url", "selectors.item", "selectors.title", "selectors.link"]
    }

    async fn run(&self, payload: &Value) -> Result<ScrapeSummary, AppError> {
        let params: SimpleParams = parse_params(self.job_type(), payload)?;
        let selectors = CompiledSelectors::compile(&params.selectors)?;
        let base = Url::parse(&params.url)
            .map_err(|e| AppError::Validation(format!("invalid url '{}': {e}", params.url)))?;

        let html = self.fetcher.fetch(&params.url).await?;
        let outcomes = extract_items(&html, &selectors, &base, &params.url, Utc::now());
        if outcomes.is_empty() {
            return Err(AppError::Scrape(format!(
                "item selector '{}' matched nothing on {}",
                params.selectors.item, params.url
            )));
        }

        let mut seen = HashSet::new();
        let mut summary = ScrapeSummary::default();
        for outcome in outcomes {
            let outcome = match outcome {
                ItemOutcome::Extracted(record) if !seen.insert(record.key.clone()) => {
                    let link = record.url.unwrap_or_default();
                    ItemOutcome::Skipped(format!("duplicate link '{link}'"))
                }
                other => other,
            };
            summary.absorb(self.sink.as_ref(), outcome).await?;
        }
        tracing::info!(
            url = %params.url,
            inserted = summary.inserted,
            updated = summary.updated,
            skipped = summary.skipped,
            "Page scraped"
        );
        Ok(summary)
    }
}

/// Parse `html` and turn every item match into an outcome. Synchronous so the
/// parsed document never lives across an await. Links resolve against `base`;
/// `source` is recorded as given.
fn extract_items(
    html: &str,
    selectors: &CompiledSelectors,
    base: &Url,
    source: &str,
    scraped_at: DateTime<Utc>,
) -> Vec<ItemOutcome> {
    let document = Html::parse_document(html);
    document
        .select(&selectors.item)
        .map(|item| extract_item(item, selectors, base, source, scraped_at))
        .collect()
}

fn extract_item(
    item: ElementRef<'_>,
    selectors: &CompiledSelectors,
    base: &Url,
    source: &str,
    scraped_at: DateTime<Utc>,
) -> ItemOutcome {
    let Some(title) = item
        .select(&selectors.title)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
    else {
        return ItemOutcome::Skipped("missing title".to_string());
    };

    let Some(href) = item
        .select(&selectors.link)
        .next()
        .and_then(|el| el.value().attr("href"))
        .map(str::trim)
        .filter(|h| !h.is_empty())
    else {
        return ItemOutcome::Skipped(format!("missing link for '{title}'"));
    };

    let link = match base.join(href) {
        Ok(link) => link.to_string(),
        Err(e) => return ItemOutcome::Skipped(format!("unresolvable link '{href}': {e}")),
    };

    let price = selectors.price.as_ref().and_then(|sel| {
        item.select(sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|p| !p.is_empty())
    });

    ItemOutcome::Extracted(NewRecord {
        key: RecordKey::Link(link.clone()),
        title: Some(title),
        url: Some(link),
        price,
        raw_html: Some(item.inner_html()),
        source: source.to_string(),
        job_query: None,
        scraped_at,
    })
}
