//! Captured chart metadata.
//!
//! A row is written once per successful capture and is never updated by the
//! pipeline. `(symbol, capture_date, period)` is the idempotency key.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Period recorded when the chart's period control could not be read.
pub const UNKNOWN_PERIOD: &str = "Unknown";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedItem {
    pub id: i64,
    pub symbol: String,
    pub capture_date: NaiveDate,
    pub image_file_name: String,
    pub source_url: Option<String>,
    pub period: Option<String>,
    pub fingerprint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub tags: Vec<String>,
}

/// Input for `MetadataStore::insert`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCapturedItem {
    pub symbol: String,
    pub capture_date: NaiveDate,
    pub image_file_name: String,
    pub source_url: String,
    pub period: Option<String>,
    pub fingerprint: Option<String>,
}

impl NewCapturedItem {
    pub fn key(&self) -> ItemKey {
        ItemKey {
            symbol: self.symbol.clone(),
            capture_date: self.capture_date,
            period: self
                .period
                .clone()
                .unwrap_or_else(|| UNKNOWN_PERIOD.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub symbol: String,
    pub capture_date: NaiveDate,
    pub period: String,
}

impl std::fmt::Display for ItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} [{}]", self.symbol, self.capture_date, self.period)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TagMatch {
    /// Item carries at least one of the requested tags.
    #[default]
    Any,
    /// Item carries every requested tag.
    All,
}

/// Filters for listing stored items. Empty fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct ItemQuery {
    pub ticker: Option<String>,
    pub period: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub tags: Vec<String>,
    pub tag_match: TagMatch,
    /// Keep only the newest item per `(ticker, period)`.
    pub latest_per_ticker: bool,
}
