use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Storage format of `charts.chart_date`.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// `CURRENT_TIMESTAMP` layout written by SQLite defaults.
const SQLITE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(value: &str, field: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .with_context(|| format!("failed to parse {field} '{value}'"))
}

/// Accepts both RFC 3339 (rows written by this crate) and SQLite's
/// `CURRENT_TIMESTAMP` layout (rows written by other tools).
pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, SQLITE_TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|err| anyhow!("failed to parse {field} '{value}': {err}"))
}

/// Splits a `GROUP_CONCAT(..., char(31))` column back into its parts.
pub fn split_concat(value: Option<String>) -> Vec<String> {
    value
        .map(|raw| {
            raw.split('\u{1f}')
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
