use std::{
    cell::Cell,
    fmt,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::time::{self, Instant};

use crate::{
    browser::{poll_until, ChartPage},
    config::{CaptureConfig, SiteSelectors, Timings},
    db::{ItemKey, MetadataStore, NewCapturedItem, UNKNOWN_PERIOD},
    error::CaptureError,
    imaging::{fingerprint::fingerprint_file, fingerprint_distance, SidebarCropper},
};

use super::extract::{extract_period, extract_symbol, Extraction};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CaptureStage {
    Navigating,
    Locating,
    ExtractingMetadata,
    CheckingDedup,
    Capturing,
    PostProcessing,
    Persisting,
    Done,
}

impl fmt::Display for CaptureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureStage::Navigating => "navigating",
            CaptureStage::Locating => "locating chart",
            CaptureStage::ExtractingMetadata => "extracting metadata",
            CaptureStage::CheckingDedup => "checking for duplicates",
            CaptureStage::Capturing => "capturing",
            CaptureStage::PostProcessing => "post-processing",
            CaptureStage::Persisting => "persisting",
            CaptureStage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct CapturedTarget {
    pub item_id: i64,
    pub key: ItemKey,
    pub image_path: PathBuf,
    pub cropped: bool,
    /// Symbol or period came from a fallback rather than the page.
    pub degraded: bool,
}

#[derive(Debug, Clone)]
pub enum CaptureOutcome {
    Captured(CapturedTarget),
    /// An item with this key already exists; nothing was written.
    Skipped(ItemKey),
}

/// A target that ended in the failed state.
#[derive(Debug)]
pub struct TargetFailure {
    pub target: String,
    /// Stage that was running when the error surfaced.
    pub stage: CaptureStage,
    pub error: CaptureError,
}

impl fmt::Display for TargetFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed while {}: {}", self.target, self.stage, self.error)?;
        let mut source = std::error::Error::source(&self.error);
        while let Some(cause) = source {
            write!(f, ": {cause}")?;
            source = cause.source();
        }
        Ok(())
    }
}

/// Per-run inputs shared by every target.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub images_dir: PathBuf,
    pub selectors: SiteSelectors,
    pub timings: Timings,
    pub cropper: SidebarCropper,
    pub capture_date: NaiveDate,
}

impl CaptureSettings {
    pub fn from_config(config: &CaptureConfig, capture_date: NaiveDate) -> Self {
        Self {
            images_dir: config.images_dir(),
            selectors: config.selectors.clone(),
            timings: config.timings.clone(),
            cropper: SidebarCropper::default(),
            capture_date,
        }
    }
}

/// Drives one target through navigate, locate, extract, dedup, capture,
/// post-process and persist.
pub struct CaptureWorkflow<'a, P: ?Sized, S: ?Sized> {
    page: &'a P,
    store: &'a S,
    settings: &'a CaptureSettings,
    stage: Cell<CaptureStage>,
}

impl<'a, P, S> CaptureWorkflow<'a, P, S>
where
    P: ChartPage + ?Sized,
    S: MetadataStore + ?Sized,
{
    pub fn new(page: &'a P, store: &'a S, settings: &'a CaptureSettings) -> Self {
        Self {
            page,
            store,
            settings,
            stage: Cell::new(CaptureStage::Navigating),
        }
    }

    /// Last stage entered. Still meaningful after the `run` future was
    /// abandoned part-way, e.g. by a panic.
    pub fn stage(&self) -> CaptureStage {
        self.stage.get()
    }

    pub async fn run(&self, target: &str) -> Result<CaptureOutcome, TargetFailure> {
        let started = Instant::now();
        match self.advance(target).await {
            Ok(outcome) => {
                self.enter(CaptureStage::Done);
                log_debug!("{target} finished in {}ms", started.elapsed().as_millis());
                Ok(outcome)
            }
            Err(error) => {
                let failure = TargetFailure {
                    target: target.to_string(),
                    stage: self.stage(),
                    error,
                };
                log_error!("{failure}");
                Err(failure)
            }
        }
    }

    fn enter(&self, stage: CaptureStage) {
        log_debug!("-> {stage}");
        self.stage.set(stage);
    }

    async fn advance(&self, target: &str) -> Result<CaptureOutcome, CaptureError> {
        self.enter(CaptureStage::Navigating);
        self.navigate(target).await?;

        self.enter(CaptureStage::Locating);
        self.locate_chart().await?;

        self.enter(CaptureStage::ExtractingMetadata);
        let (key, degraded) = self.extract_key(target).await?;

        self.enter(CaptureStage::CheckingDedup);
        if self.store.exists(&key).await.map_err(CaptureError::DedupCheck)? {
            log_info!("Skipping {key}: already captured");
            return Ok(CaptureOutcome::Skipped(key));
        }

        self.enter(CaptureStage::Capturing);
        let image_path = self.capture_image(&key).await?;

        self.enter(CaptureStage::PostProcessing);
        let (cropped, fingerprint) = self.post_process(&image_path).await?;
        if let Some(fingerprint) = &fingerprint {
            self.warn_if_unchanged(&key, fingerprint).await;
        }

        self.enter(CaptureStage::Persisting);
        let item_id = self.persist(target, &key, &image_path, fingerprint).await?;

        log_info!(
            "Captured {key} as item {item_id} -> {}{}",
            image_path.display(),
            if cropped { " (sidebar cropped)" } else { "" }
        );

        Ok(CaptureOutcome::Captured(CapturedTarget {
            item_id,
            key,
            image_path,
            cropped,
            degraded,
        }))
    }

    async fn navigate(&self, target: &str) -> Result<(), CaptureError> {
        let timings = &self.settings.timings;
        let budget = timings.navigation_timeout;
        let started = Instant::now();

        match time::timeout(budget, self.page.goto(target)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(CaptureError::Navigation(err)),
            Err(_) => return Err(CaptureError::NavigationTimeout(budget)),
        }

        let page = self.page;
        let remaining = budget.saturating_sub(started.elapsed());
        if !poll_until(remaining, timings.poll_interval, || page.content_loaded()).await {
            return Err(CaptureError::NavigationTimeout(budget));
        }
        Ok(())
    }

    async fn locate_chart(&self) -> Result<(), CaptureError> {
        let selector = self.settings.selectors.chart_image.as_str();
        let timings = &self.settings.timings;
        let page = self.page;

        if poll_until(timings.element_timeout, timings.poll_interval, || page.element_ready(selector)).await {
            Ok(())
        } else {
            Err(CaptureError::ElementNotFound {
                selector: selector.to_string(),
                waited: timings.element_timeout,
            })
        }
    }

    async fn extract_key(&self, target: &str) -> Result<(ItemKey, bool), CaptureError> {
        let selectors = &self.settings.selectors;
        let budget = self.settings.timings.extraction_timeout;

        let symbol = extract_symbol(
            self.page,
            &selectors.symbol_input,
            target,
            &selectors.symbol_query_param,
            budget,
        )
        .await;
        let period = extract_period(self.page, &selectors.period_control, budget).await;
        let degraded = symbol.is_degraded() || period.is_degraded();

        let symbol = match symbol {
            Extraction::Found(symbol) | Extraction::Fallback(symbol) => symbol,
            Extraction::Unknown => {
                return Err(CaptureError::SymbolUnavailable {
                    url: target.to_string(),
                })
            }
        };
        let period = period
            .into_value()
            .unwrap_or_else(|| UNKNOWN_PERIOD.to_string());

        Ok((
            ItemKey {
                symbol,
                capture_date: self.settings.capture_date,
                period,
            },
            degraded,
        ))
    }

    async fn capture_image(&self, key: &ItemKey) -> Result<PathBuf, CaptureError> {
        let budget = self.settings.timings.screenshot_timeout;
        let selector = self.settings.selectors.chart_image.as_str();

        let png = match time::timeout(budget, self.page.screenshot_element(selector)).await {
            Ok(Ok(png)) => png,
            Ok(Err(err)) => return Err(CaptureError::Screenshot(err)),
            Err(_) => return Err(CaptureError::ScreenshotTimeout(budget)),
        };

        let file_name = image_file_name(&key.symbol, key.capture_date, Utc::now());
        let path = self.settings.images_dir.join(file_name);
        tokio::fs::write(&path, &png)
            .await
            .map_err(|source| CaptureError::ImageWrite {
                path: path.clone(),
                source,
            })?;

        log_debug!("Wrote {} bytes to {}", png.len(), path.display());
        Ok(path)
    }

    /// Crops the sidebar and fingerprints the result. Either step failing is
    /// logged and the capture is kept as written.
    async fn post_process(&self, path: &Path) -> Result<(bool, Option<String>), CaptureError> {
        let cropper = self.settings.cropper.clone();
        let path = path.to_path_buf();

        tokio::task::spawn_blocking(move || {
            let cropped = cropper.process(&path).unwrap_or_else(|err| {
                log_warn!("Keeping {} uncropped: {err:#}", path.display());
                false
            });
            let fingerprint = fingerprint_file(&path)
                .map_err(|err| log_warn!("No fingerprint for {}: {err:#}", path.display()))
                .ok();
            (cropped, fingerprint)
        })
        .await
        .map_err(|err| CaptureError::PostProcess(anyhow!("post-processing worker join failed: {err}")))
    }

    async fn warn_if_unchanged(&self, key: &ItemKey, fingerprint: &str) {
        match self.store.latest_fingerprint(&key.symbol, &key.period).await {
            Ok(Some(previous)) if fingerprint_distance(&previous, fingerprint) == 0 => {
                log_warn!("{key} looks identical to the previous capture; the chart may not have updated");
            }
            Ok(_) => {}
            Err(err) => log_debug!("previous fingerprint lookup failed for {key}: {err:#}"),
        }
    }

    async fn persist(
        &self,
        target: &str,
        key: &ItemKey,
        image_path: &Path,
        fingerprint: Option<String>,
    ) -> Result<i64, CaptureError> {
        let image_file_name = image_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let item = NewCapturedItem {
            symbol: key.symbol.clone(),
            capture_date: key.capture_date,
            image_file_name,
            source_url: target.to_string(),
            period: Some(key.period.clone()),
            fingerprint,
        };

        self.store
            .insert(&item)
            .await
            .map_err(|source| CaptureError::Persistence {
                path: image_path.to_path_buf(),
                source,
            })
    }
}

/// `<SYMBOL>_<YYYY-MM-DD>_<unix micros>.png`, with anything outside
/// `[A-Za-z0-9._-]` in the symbol replaced by `_`.
pub fn image_file_name(symbol: &str, date: NaiveDate, at: DateTime<Utc>) -> String {
    let symbol: String = symbol
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{symbol}_{}_{}.png", date.format("%Y-%m-%d"), at.timestamp_micros())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use tempfile::TempDir;

    use super::*;
    use crate::capture::fake::FakePage;
    use crate::db::{Database, ItemQuery};

    const TARGET: &str = "https://stockcharts.com/sc3/ui/?s=AAPL";

    fn settings(dir: &TempDir) -> CaptureSettings {
        let images_dir = dir.path().join("images");
        std::fs::create_dir_all(&images_dir).unwrap();
        CaptureSettings {
            images_dir,
            selectors: SiteSelectors::default(),
            timings: Timings::immediate(),
            cropper: SidebarCropper::default(),
            capture_date: NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
        }
    }

    fn chart_page(settings: &CaptureSettings) -> FakePage {
        FakePage::with_chart(&settings.selectors.chart_image)
            .with_value(&settings.selectors.symbol_input, "AAPL")
            .with_value(&settings.selectors.period_control, "Daily")
    }

    fn image_count(settings: &CaptureSettings) -> usize {
        std::fs::read_dir(&settings.images_dir).unwrap().count()
    }

    #[tokio::test]
    async fn captures_crops_and_persists() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let db = Database::new(dir.path().join("charts.db")).unwrap();
        let page = chart_page(&settings);

        let outcome = CaptureWorkflow::new(&page, &db, &settings).run(TARGET).await.unwrap();
        let CaptureOutcome::Captured(captured) = outcome else {
            panic!("expected a capture, got {outcome:?}");
        };

        assert!(captured.cropped);
        assert!(!captured.degraded);
        assert_eq!(captured.key.symbol, "AAPL");
        assert_eq!(captured.key.period, "Daily");

        let file_name = captured.image_path.file_name().unwrap().to_string_lossy();
        assert!(file_name.starts_with("AAPL_2025-03-03_"), "{file_name}");
        assert!(file_name.ends_with(".png"));
        assert_eq!(image::open(&captured.image_path).unwrap().width(), 350);

        let items = db.query_items(ItemQuery::default()).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source_url.as_deref(), Some(TARGET));
        assert_eq!(items[0].image_file_name, file_name);
        assert!(items[0].fingerprint.is_some());
    }

    #[tokio::test]
    async fn second_run_for_same_key_is_a_skip() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let db = Database::new(dir.path().join("charts.db")).unwrap();
        let page = chart_page(&settings);
        let workflow = CaptureWorkflow::new(&page, &db, &settings);

        assert!(matches!(workflow.run(TARGET).await, Ok(CaptureOutcome::Captured(_))));
        let second = workflow.run(TARGET).await.unwrap();
        assert!(matches!(second, CaptureOutcome::Skipped(ref key) if key.symbol == "AAPL"));
        assert_eq!(workflow.stage(), CaptureStage::Done);

        assert_eq!(db.query_items(ItemQuery::default()).await.unwrap().len(), 1);
        assert_eq!(image_count(&settings), 1);
    }

    #[tokio::test]
    async fn symbol_falls_back_to_url_and_period_to_unknown() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let db = Database::new(dir.path().join("charts.db")).unwrap();
        let page = FakePage::with_chart(&settings.selectors.chart_image);

        let outcome = CaptureWorkflow::new(&page, &db, &settings).run(TARGET).await.unwrap();
        let CaptureOutcome::Captured(captured) = outcome else {
            panic!("expected a capture");
        };
        assert!(captured.degraded);
        assert_eq!(captured.key.symbol, "AAPL");
        assert_eq!(captured.key.period, UNKNOWN_PERIOD);
    }

    #[tokio::test]
    async fn missing_symbol_everywhere_fails_extraction() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let db = Database::new(dir.path().join("charts.db")).unwrap();
        let page = FakePage::with_chart(&settings.selectors.chart_image);

        let failure = CaptureWorkflow::new(&page, &db, &settings)
            .run("https://stockcharts.com/sc3/ui/")
            .await
            .unwrap_err();
        assert_eq!(failure.stage, CaptureStage::ExtractingMetadata);
        assert!(matches!(failure.error, CaptureError::SymbolUnavailable { .. }));
        assert_eq!(image_count(&settings), 0);
    }

    #[tokio::test]
    async fn missing_chart_element_fails_locating() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let db = Database::new(dir.path().join("charts.db")).unwrap();
        let page = FakePage::default();

        let failure = CaptureWorkflow::new(&page, &db, &settings)
            .run(TARGET)
            .await
            .unwrap_err();
        assert_eq!(failure.stage, CaptureStage::Locating);
        assert!(matches!(failure.error, CaptureError::ElementNotFound { .. }));
        assert_eq!(failure.target, TARGET);
    }

    #[tokio::test]
    async fn slow_page_fails_navigation_with_timeout() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let db = Database::new(dir.path().join("charts.db")).unwrap();
        let page = chart_page(&settings).slow_navigation(Duration::from_secs(5));

        let failure = CaptureWorkflow::new(&page, &db, &settings)
            .run(TARGET)
            .await
            .unwrap_err();
        assert_eq!(failure.stage, CaptureStage::Navigating);
        assert!(matches!(failure.error, CaptureError::NavigationTimeout(_)));
    }

    #[tokio::test]
    async fn navigation_waits_for_content_loaded() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let db = Database::new(dir.path().join("charts.db")).unwrap();
        let page = chart_page(&settings).loading_for(3);

        let outcome = CaptureWorkflow::new(&page, &db, &settings).run(TARGET).await.unwrap();
        assert!(matches!(outcome, CaptureOutcome::Captured(_)));
    }

    #[tokio::test]
    async fn page_that_never_loads_times_out_navigating() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let db = Database::new(dir.path().join("charts.db")).unwrap();
        let page = chart_page(&settings).loading_for(u32::MAX);

        let failure = CaptureWorkflow::new(&page, &db, &settings)
            .run(TARGET)
            .await
            .unwrap_err();
        assert_eq!(failure.stage, CaptureStage::Navigating);
        assert!(matches!(failure.error, CaptureError::NavigationTimeout(_)));
        assert_eq!(image_count(&settings), 0);
    }

    #[tokio::test]
    async fn locating_waits_until_chart_is_laid_out() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let db = Database::new(dir.path().join("charts.db")).unwrap();
        let page = chart_page(&settings).chart_ready_after(5);

        let outcome = CaptureWorkflow::new(&page, &db, &settings).run(TARGET).await.unwrap();
        let CaptureOutcome::Captured(captured) = outcome else {
            panic!("expected a capture");
        };
        assert!(captured.cropped);
    }

    #[tokio::test]
    async fn undecodable_capture_is_kept_uncropped() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let db = Database::new(dir.path().join("charts.db")).unwrap();
        let page = chart_page(&settings).with_screenshot(b"not a png");

        let outcome = CaptureWorkflow::new(&page, &db, &settings).run(TARGET).await.unwrap();
        let CaptureOutcome::Captured(captured) = outcome else {
            panic!("expected a capture");
        };
        assert!(!captured.cropped);
        assert_eq!(std::fs::read(&captured.image_path).unwrap(), b"not a png");

        let items = db.query_items(ItemQuery::default()).await.unwrap();
        assert_eq!(items.len(), 1);
        assert!(items[0].fingerprint.is_none());
    }

    struct RejectingStore;

    #[async_trait]
    impl MetadataStore for RejectingStore {
        async fn exists(&self, _key: &ItemKey) -> Result<bool> {
            Ok(false)
        }

        async fn insert(&self, _item: &NewCapturedItem) -> Result<i64> {
            Err(anyhow!("database is locked"))
        }

        async fn list_tags(&self) -> Result<BTreeMap<String, u64>> {
            Ok(BTreeMap::new())
        }
    }

    #[tokio::test]
    async fn persistence_failure_leaves_image_on_disk() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let page = chart_page(&settings);

        let failure = CaptureWorkflow::new(&page, &RejectingStore, &settings)
            .run(TARGET)
            .await
            .unwrap_err();
        assert_eq!(failure.stage, CaptureStage::Persisting);
        let CaptureError::Persistence { path, .. } = &failure.error else {
            panic!("expected persistence error, got {:?}", failure.error);
        };
        assert!(path.exists());
    }

    #[test]
    fn failure_display_includes_cause_once() {
        let failure = TargetFailure {
            target: TARGET.to_string(),
            stage: CaptureStage::Navigating,
            error: CaptureError::Navigation(anyhow!("net::ERR_NAME_NOT_RESOLVED")),
        };
        assert_eq!(
            failure.to_string(),
            format!("{TARGET} failed while navigating: navigation failed: net::ERR_NAME_NOT_RESOLVED")
        );
    }

    #[test]
    fn file_names_are_sanitized_and_time_stamped() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        let at = Utc.timestamp_opt(1_740_999_600, 123_456_000).unwrap();
        assert_eq!(
            image_file_name("$SPX", date, at),
            "_SPX_2025-03-03_1740999600123456.png"
        );
        assert_eq!(
            image_file_name("BRK.B", date, at),
            "BRK.B_2025-03-03_1740999600123456.png"
        );
        assert_eq!(
            image_file_name("../etc", date, at),
            ".._etc_2025-03-03_1740999600123456.png"
        );
    }
}
