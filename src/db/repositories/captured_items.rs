use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, params_from_iter, types::Value, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{format_date, parse_date, parse_datetime, split_concat},
    models::{CapturedItem, ItemKey, ItemQuery, NewCapturedItem, TagMatch, UNKNOWN_PERIOD},
};

const ITEM_COLUMNS: &str = "c.id AS id,
    c.ticker AS ticker,
    c.chart_date AS chart_date,
    c.image_filename AS image_filename,
    c.original_url AS original_url,
    c.period AS period,
    c.fingerprint AS fingerprint,
    c.created_at AS created_at,
    GROUP_CONCAT(t.tag_name, char(31)) AS tags";

fn row_to_item(row: &Row) -> Result<CapturedItem> {
    let chart_date: String = row.get("chart_date")?;
    let created_at: String = row.get("created_at")?;

    Ok(CapturedItem {
        id: row.get("id")?,
        symbol: row.get("ticker")?,
        capture_date: parse_date(&chart_date, "chart_date")?,
        image_file_name: row.get("image_filename")?,
        source_url: row.get("original_url")?,
        period: row.get("period")?,
        fingerprint: row.get("fingerprint")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        tags: split_concat(row.get("tags")?),
    })
}

impl Database {
    pub async fn item_exists(&self, key: &ItemKey) -> Result<bool> {
        let key = key.clone();
        self.execute(move |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM charts
                     WHERE ticker = ?1 AND chart_date = ?2 AND IFNULL(period, ?4) = ?3
                     LIMIT 1",
                    params![
                        key.symbol,
                        format_date(key.capture_date),
                        key.period,
                        UNKNOWN_PERIOD
                    ],
                    |_| Ok(()),
                )
                .optional()
                .context("failed to check for existing chart")?;
            Ok(found.is_some())
        })
        .await
    }

    /// Inserts a new item and returns its id. Fails if the idempotency key is
    /// already taken.
    pub async fn insert_item(&self, item: &NewCapturedItem) -> Result<i64> {
        let record = item.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO charts (ticker, chart_date, image_filename, original_url, period, fingerprint, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.symbol,
                    format_date(record.capture_date),
                    record.image_file_name,
                    record.source_url,
                    record.period,
                    record.fingerprint,
                    Utc::now().to_rfc3339(),
                ],
            )
            .with_context(|| format!("failed to insert chart {}", record.key()))?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    pub async fn get_item(&self, item_id: i64) -> Result<Option<CapturedItem>> {
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {ITEM_COLUMNS}
                 FROM charts c LEFT JOIN tags t ON c.id = t.chart_id
                 WHERE c.id = ?1
                 GROUP BY c.id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![item_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_item(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    /// Most recent fingerprint stored for a symbol and period.
    pub async fn latest_item_fingerprint(
        &self,
        symbol: &str,
        period: &str,
    ) -> Result<Option<String>> {
        let symbol = symbol.to_string();
        let period = period.to_string();
        self.execute(move |conn| {
            let fingerprint: Option<Option<String>> = conn
                .query_row(
                    "SELECT fingerprint FROM charts
                     WHERE ticker = ?1 AND IFNULL(period, ?3) = ?2 AND fingerprint IS NOT NULL
                     ORDER BY chart_date DESC, id DESC
                     LIMIT 1",
                    params![symbol, period, UNKNOWN_PERIOD],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(fingerprint.flatten())
        })
        .await
    }

    /// Lists items newest first, each with its tags.
    pub async fn query_items(&self, query: ItemQuery) -> Result<Vec<CapturedItem>> {
        self.execute(move |conn| {
            let mut conditions: Vec<String> = Vec::new();
            let mut values: Vec<Value> = Vec::new();

            if let Some(ticker) = query.ticker {
                conditions.push("UPPER(c.ticker) = UPPER(?)".into());
                values.push(Value::Text(ticker));
            }
            if let Some(period) = query.period {
                conditions.push("UPPER(c.period) = UPPER(?)".into());
                values.push(Value::Text(period));
            }
            if let Some(from) = query.date_from {
                conditions.push("c.chart_date >= ?".into());
                values.push(Value::Text(format_date(from)));
            }
            if let Some(to) = query.date_to {
                conditions.push("c.chart_date <= ?".into());
                values.push(Value::Text(format_date(to)));
            }
            if !query.tags.is_empty() {
                let placeholders = vec!["?"; query.tags.len()].join(",");
                match query.tag_match {
                    TagMatch::Any => conditions.push(format!(
                        "c.id IN (SELECT chart_id FROM tags WHERE tag_name IN ({placeholders}))"
                    )),
                    TagMatch::All => conditions.push(format!(
                        "c.id IN (
                            SELECT chart_id FROM tags
                            WHERE tag_name IN ({placeholders})
                            GROUP BY chart_id
                            HAVING COUNT(DISTINCT tag_name) = ?
                        )"
                    )),
                }
                let mut distinct = query.tags.clone();
                distinct.sort();
                distinct.dedup();
                values.extend(query.tags.into_iter().map(Value::Text));
                if query.tag_match == TagMatch::All {
                    values.push(Value::Integer(distinct.len() as i64));
                }
            }

            let mut sql =
                format!("SELECT {ITEM_COLUMNS} FROM charts c LEFT JOIN tags t ON c.id = t.chart_id");
            if !conditions.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&conditions.join(" AND "));
            }
            sql.push_str(" GROUP BY c.id");

            if query.latest_per_ticker {
                sql = format!(
                    "SELECT * FROM (
                        SELECT sub.*,
                               ROW_NUMBER() OVER (
                                   PARTITION BY sub.ticker, sub.period
                                   ORDER BY sub.chart_date DESC, sub.id DESC
                               ) AS rn
                        FROM ({sql}) sub
                    )
                    WHERE rn = 1"
                );
            }
            sql.push_str(" ORDER BY chart_date DESC, id DESC");

            let mut stmt = conn.prepare(&sql).context("failed to prepare chart query")?;
            let mut rows = stmt.query(params_from_iter(values.iter()))?;
            let mut items = Vec::new();
            while let Some(row) = rows.next()? {
                items.push(row_to_item(row)?);
            }

            Ok(items)
        })
        .await
    }
}
