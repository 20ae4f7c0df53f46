use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

use super::{
    connection::Database,
    models::{ItemKey, NewCapturedItem},
};

/// Metadata operations the capture pipeline depends on.
///
/// The pipeline assumes sequential, single-writer access; the store itself is
/// responsible for making `insert` atomic with respect to the item key.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn exists(&self, key: &ItemKey) -> Result<bool>;

    async fn insert(&self, item: &NewCapturedItem) -> Result<i64>;

    async fn list_tags(&self) -> Result<BTreeMap<String, u64>>;

    /// Fingerprint of the newest stored capture for `(symbol, period)`.
    async fn latest_fingerprint(&self, _symbol: &str, _period: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

#[async_trait]
impl MetadataStore for Database {
    async fn exists(&self, key: &ItemKey) -> Result<bool> {
        self.item_exists(key).await
    }

    async fn insert(&self, item: &NewCapturedItem) -> Result<i64> {
        self.insert_item(item).await
    }

    async fn list_tags(&self) -> Result<BTreeMap<String, u64>> {
        self.tag_counts().await
    }

    async fn latest_fingerprint(&self, symbol: &str, period: &str) -> Result<Option<String>> {
        self.latest_item_fingerprint(symbol, period).await
    }
}
