//! Ticker and period extraction.
//!
//! A missing field is an expected outcome, not an error: reads come back as
//! an `Extraction` and the workflow decides what a degraded value means.

use std::time::Duration;

use tokio::time;
use url::Url;

use crate::browser::ChartPage;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction<T> {
    /// Read from the page.
    Found(T),
    /// Recovered from a secondary source.
    Fallback(T),
    Unknown,
}

impl<T> Extraction<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            Extraction::Found(value) | Extraction::Fallback(value) => Some(value),
            Extraction::Unknown => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        !matches!(self, Extraction::Found(_))
    }
}

/// Reads one form field within `budget`. Timeouts, evaluation errors and
/// empty values all collapse to `None`.
pub async fn read_field<P>(page: &P, selector: &str, budget: Duration) -> Option<String>
where
    P: ChartPage + ?Sized,
{
    match time::timeout(budget, page.input_value(selector)).await {
        Ok(Ok(value)) => value.filter(|v| !v.trim().is_empty()),
        Ok(Err(err)) => {
            log_debug!("reading `{selector}` failed: {err:#}");
            None
        }
        Err(_) => {
            log_debug!("reading `{selector}` timed out after {budget:?}");
            None
        }
    }
}

/// Ticker from the page's symbol field, falling back to the URL query.
pub async fn extract_symbol<P>(
    page: &P,
    selector: &str,
    url: &str,
    query_param: &str,
    budget: Duration,
) -> Extraction<String>
where
    P: ChartPage + ?Sized,
{
    if let Some(symbol) = read_field(page, selector, budget).await.and_then(|raw| normalize_symbol(&raw)) {
        return Extraction::Found(symbol);
    }

    match symbol_from_url(url, query_param) {
        Some(symbol) => {
            log_warn!("symbol field unreadable; using `{symbol}` from {url}");
            Extraction::Fallback(symbol)
        }
        None => Extraction::Unknown,
    }
}

pub async fn extract_period<P>(page: &P, selector: &str, budget: Duration) -> Extraction<String>
where
    P: ChartPage + ?Sized,
{
    match read_field(page, selector, budget).await {
        Some(period) => Extraction::Found(period.trim().to_string()),
        None => {
            log_warn!("period control unreadable; recording period as unknown");
            Extraction::Unknown
        }
    }
}

pub fn normalize_symbol(raw: &str) -> Option<String> {
    let symbol = raw.trim().to_uppercase();
    (!symbol.is_empty()).then_some(symbol)
}

/// Value of `param` in the query string of `url`, percent-decoded and
/// upper-cased.
pub fn symbol_from_url(url: &str, param: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    url.query_pairs()
        .filter(|(key, _)| key == param)
        .find_map(|(_, value)| normalize_symbol(&value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::fake::FakePage;

    const SYMBOL: &str = "input#symbol";
    const PERIOD: &str = "#period-menu-lower";
    const BUDGET: Duration = Duration::from_millis(50);

    #[test]
    fn symbol_comes_from_query_string() {
        assert_eq!(
            symbol_from_url("https://stockcharts.com/sc3/ui/?s=AAPL", "s").as_deref(),
            Some("AAPL")
        );
        assert_eq!(
            symbol_from_url("https://example.com/chart?p=D&s=msft#top", "s").as_deref(),
            Some("MSFT")
        );
        assert_eq!(
            symbol_from_url("https://example.com/chart?s=%24SPX", "s").as_deref(),
            Some("$SPX")
        );
    }

    #[test]
    fn missing_or_empty_query_param_yields_none() {
        assert_eq!(symbol_from_url("https://example.com/chart", "s"), None);
        assert_eq!(symbol_from_url("https://example.com/chart?s=", "s"), None);
        assert_eq!(symbol_from_url("https://example.com/chart?sym=AAPL", "s"), None);
    }

    #[test]
    fn escapes_are_decoded_and_malformed_ones_kept() {
        assert_eq!(
            symbol_from_url("https://x.test/?s=BRK%2eB", "s").as_deref(),
            Some("BRK.B")
        );
        assert_eq!(
            symbol_from_url("https://x.test/?s=%zzA", "s").as_deref(),
            Some("%ZZA")
        );
        assert_eq!(symbol_from_url("not a url ?s=AAPL", "s"), None);
    }

    #[tokio::test]
    async fn symbol_field_wins_over_url() {
        let page = FakePage::default().with_value(SYMBOL, " nvda ");
        let symbol = extract_symbol(&page, SYMBOL, "https://x.test/?s=AAPL", "s", BUDGET).await;
        assert_eq!(symbol, Extraction::Found("NVDA".to_string()));
    }

    #[tokio::test]
    async fn unreadable_symbol_field_falls_back_to_url() {
        let page = FakePage::default();
        let symbol = extract_symbol(&page, SYMBOL, "https://x.test/?s=AAPL", "s", BUDGET).await;
        assert_eq!(symbol, Extraction::Fallback("AAPL".to_string()));
        assert!(symbol.is_degraded());
    }

    #[tokio::test]
    async fn failing_field_read_falls_back_to_url() {
        let page = FakePage::default().failing_reads();
        let symbol = extract_symbol(&page, SYMBOL, "https://x.test/?s=AAPL", "s", BUDGET).await;
        assert_eq!(symbol.into_value().as_deref(), Some("AAPL"));
    }

    #[tokio::test]
    async fn no_symbol_anywhere_is_unknown() {
        let page = FakePage::default();
        let symbol = extract_symbol(&page, SYMBOL, "https://x.test/chart", "s", BUDGET).await;
        assert_eq!(symbol, Extraction::Unknown);
    }

    #[tokio::test]
    async fn period_degrades_to_unknown() {
        let page = FakePage::default();
        assert_eq!(extract_period(&page, PERIOD, BUDGET).await, Extraction::Unknown);

        let page = FakePage::default().with_value(PERIOD, "Daily");
        assert_eq!(
            extract_period(&page, PERIOD, BUDGET).await,
            Extraction::Found("Daily".to_string())
        );
    }
}
