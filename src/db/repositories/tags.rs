use std::collections::BTreeMap;

use anyhow::{Context, Result};
use rusqlite::params;

use crate::db::connection::Database;

impl Database {
    /// Attach a tag to an item. Returns `false` if the item already had it.
    pub async fn add_tag(&self, item_id: i64, tag_name: &str) -> Result<bool> {
        let tag_name = tag_name.trim().to_string();
        self.execute(move |conn| {
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO tags (chart_id, tag_name) VALUES (?1, ?2)",
                    params![item_id, tag_name],
                )
                .with_context(|| format!("failed to tag chart {item_id}"))?;
            Ok(inserted == 1)
        })
        .await
    }

    /// Returns `false` if the item did not carry the tag.
    pub async fn remove_tag(&self, item_id: i64, tag_name: &str) -> Result<bool> {
        let tag_name = tag_name.trim().to_string();
        self.execute(move |conn| {
            let removed = conn.execute(
                "DELETE FROM tags WHERE chart_id = ?1 AND tag_name = ?2",
                params![item_id, tag_name],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    /// Tag name to number of items carrying it.
    pub async fn tag_counts(&self) -> Result<BTreeMap<String, u64>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT tag_name, COUNT(*) FROM tags GROUP BY tag_name ORDER BY tag_name",
            )?;
            let mut rows = stmt.query([])?;
            let mut counts = BTreeMap::new();
            while let Some(row) = rows.next()? {
                let name: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                counts.insert(name, count.max(0) as u64);
            }
            Ok(counts)
        })
        .await
    }
}
