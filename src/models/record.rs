use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A scraped listing as stored in the `listings` table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Record {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub natural_key: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub price: Option<String>,
    #[serde(skip_serializing)]
    pub raw_html: Option<String>,
    pub source: String,
    pub job_query: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub scraped_at: DateTime<Utc>,
}

/// Identity of a record across scraping runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordKey {
    /// Page items are identified by the link they point at.
    Link(String),
    /// Feed items have no stable URL, so label plus query identifies them.
    Listing { title: String, query: String },
}

impl RecordKey {
    pub fn natural_key(&self) -> String {
        match self {
            RecordKey::Link(url) => format!("link:{url}"),
            RecordKey::Listing { title, query } => {
                format!("listing:{}", serde_json::json!([query, title]))
            }
        }
    }
}

/// Mutable fields written by a single upsert.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub key: RecordKey,
    pub title: Option<String>,
    pub url: Option<String>,
    pub price: Option<String>,
    pub raw_html: Option<String>,
    pub source: String,
    pub job_query: Option<String>,
    pub scraped_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecordFilters {
    pub source: Option<String>,
    pub limit: Option<i64>,
}

impl RecordFilters {
    pub const MAX_LIMIT: i64 = 500;

    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(Self::MAX_LIMIT).clamp(1, Self::MAX_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_keys_do_not_collide_on_separators() {
        let a = RecordKey::Listing {
            title: "b".to_string(),
            query: "a:".to_string(),
        };
        let b = RecordKey::Listing {
            title: ":b".to_string(),
            query: "a".to_string(),
        };
        assert_ne!(a.natural_key(), b.natural_key());
    }

    #[test]
    fn link_and_listing_keys_live_in_separate_namespaces() {
        let link = RecordKey::Link("https://example.test/a".to_string());
        assert_eq!(link.natural_key(), "link:https://example.test/a");

        let listing = RecordKey::Listing {
            title: "Blue Bottle".to_string(),
            query: "coffee shops".to_string(),
        };
        assert!(listing.natural_key().starts_with("listing:"));
    }

    #[test]
    fn limit_is_clamped() {
        assert_eq!(RecordFilters::default().effective_limit(), 500);
        let filters = RecordFilters {
            source: None,
            limit: Some(10_000),
        };
        assert_eq!(filters.effective_limit(), 500);
        let filters = RecordFilters {
            source: None,
            limit: Some(0),
        };
        assert_eq!(filters.effective_limit(), 1);
    }
}
