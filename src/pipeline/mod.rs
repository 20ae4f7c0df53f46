//! Batch orchestration: calendar admission, one session per run, and
//! sequential per-target capture with failure isolation.

mod summary;

use std::{any::Any, panic::AssertUnwindSafe};

use chrono::NaiveDate;
use futures::FutureExt;
use tokio::time;

use crate::{
    browser::{CaptureSession, ChartPage, SessionManager},
    calendar::{HolidayCalendar, TradingCalendarGate},
    capture::{CaptureOutcome, CaptureSettings, CaptureWorkflow, TargetFailure},
    config::{load_targets, CaptureConfig},
    db::MetadataStore,
    error::{CaptureError, PipelineError},
};

pub use summary::{BatchSummary, RunStatus};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Runs a full capture batch.
///
/// Preconditions are checked in order: credentials, calendar admission,
/// target list, images directory. Any of them failing aborts before a
/// browser is launched. Once a session is open it is closed on every path
/// out of this function.
pub async fn run_capture<M, S, C>(
    manager: &M,
    store: &S,
    config: &CaptureConfig,
    gate: &TradingCalendarGate<C>,
    today: NaiveDate,
) -> Result<RunStatus, PipelineError>
where
    M: SessionManager + ?Sized,
    S: MetadataStore + ?Sized,
    C: HolidayCalendar,
{
    let credentials = config.credentials()?;

    let admission = gate.should_run(today);
    if !admission.allowed {
        if !config.force {
            log_info!("Market closed on {today} ({}); nothing to do", admission.reason);
            return Ok(RunStatus::MarketClosed {
                reason: admission.reason,
            });
        }
        log_warn!("Market closed on {today} ({}); running anyway (--force)", admission.reason);
    }

    let targets = load_targets(&config.targets_file)?;
    let settings = CaptureSettings::from_config(config, today);
    tokio::fs::create_dir_all(&settings.images_dir)
        .await
        .map_err(|err| {
            PipelineError::Config(format!(
                "cannot create images directory {}: {err}",
                settings.images_dir.display()
            ))
        })?;

    log_info!("Capturing {} target(s) for {today}", targets.len());

    let mut session = manager.open(&credentials).await?;
    log_info!("Session established");
    let summary = run_batch(&session, store, &targets, &settings).await;
    session.close().await;
    log_info!("Session released");

    Ok(RunStatus::Completed(summary))
}

/// Drives each target through the capture workflow in list order. A failing
/// or panicking target is recorded and the batch moves on.
pub async fn run_batch<P, S>(
    page: &P,
    store: &S,
    targets: &[String],
    settings: &CaptureSettings,
) -> BatchSummary
where
    P: ChartPage + ?Sized,
    S: MetadataStore + ?Sized,
{
    let mut summary = BatchSummary::start();
    let total = targets.len();

    for (index, target) in targets.iter().enumerate() {
        if index > 0 && !settings.timings.between_targets.is_zero() {
            time::sleep(settings.timings.between_targets).await;
        }
        log_info!("[{}/{total}] {target}", index + 1);

        let workflow = CaptureWorkflow::new(page, store, settings);
        match AssertUnwindSafe(workflow.run(target)).catch_unwind().await {
            Ok(Ok(CaptureOutcome::Captured(captured))) => summary.captured.push(captured),
            Ok(Ok(CaptureOutcome::Skipped(key))) => summary.skipped.push(key),
            Ok(Err(failure)) => summary.failures.push(failure),
            Err(panic) => {
                let failure = TargetFailure {
                    target: target.clone(),
                    stage: workflow.stage(),
                    error: CaptureError::Panicked(panic_message(panic.as_ref())),
                };
                log_error!("{failure}");
                summary.failures.push(failure);
            }
        }
    }

    summary.finish();
    if summary.is_clean() {
        log_info!("{summary}");
    } else {
        log_warn!("{summary}");
        for failure in &summary.failures {
            log_warn!("  {failure}");
        }
    }
    summary
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
