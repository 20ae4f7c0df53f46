//! Authenticated browsing session against the charting site.
//!
//! The capture workflow only talks to `ChartPage`; `SessionManager` and
//! `CaptureSession` cover the session's lifecycle. Sessions are driven from a
//! single task, one target at a time, so none of these traits require `Send`.

mod chrome;

use std::{future::Future, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use tokio::time;

use crate::{config::Credentials, error::PipelineError};

pub use chrome::{ChromeSession, ChromeSessionManager};

/// The page surface the capture workflow drives. Implementations do not
/// impose their own timeouts; callers bound every call.
#[async_trait(?Send)]
pub trait ChartPage {
    /// Starts navigating to `url`. Resolves once the request is issued, not
    /// when the new document has loaded; poll `content_loaded` for that.
    async fn goto(&self, url: &str) -> Result<()>;

    /// `true` once the document requested by the last `goto` has been parsed
    /// (DOMContentLoaded). Never waits for subresources or network idle.
    async fn content_loaded(&self) -> Result<bool>;

    /// `true` once the element is laid out with a non-zero box and, for
    /// images, fully decoded.
    async fn element_ready(&self, selector: &str) -> Result<bool>;

    /// Current `value` of a form control, `None` if the element is missing or
    /// empty.
    async fn input_value(&self, selector: &str) -> Result<Option<String>>;

    /// PNG snapshot of exactly the matched element.
    async fn screenshot_element(&self, selector: &str) -> Result<Vec<u8>>;
}

/// An open, logged-in session. `close` must release every underlying
/// resource and be safe to call more than once.
#[async_trait(?Send)]
pub trait CaptureSession: ChartPage {
    async fn close(&mut self);
}

#[async_trait(?Send)]
pub trait SessionManager {
    type Session: CaptureSession;

    /// Fails with `PipelineError::Authentication` when a credential field is
    /// blank (before any network activity) or the login does not settle.
    async fn open(&self, credentials: &Credentials) -> Result<Self::Session, PipelineError>;
}

pub(crate) fn ensure_credentials(credentials: &Credentials) -> Result<(), PipelineError> {
    if credentials.username.trim().is_empty() || credentials.password.is_empty() {
        return Err(PipelineError::Authentication(
            "username and password are required".into(),
        ));
    }
    Ok(())
}

/// Calls `check` every `interval` until it reports `true`. Check errors count
/// as "not yet". Returns `false` if `budget` runs out first.
pub async fn poll_until<F, Fut>(budget: Duration, interval: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let poll = async {
        loop {
            match check().await {
                Ok(true) => return,
                Ok(false) => {}
                Err(err) => debug!("readiness check failed: {err:#}"),
            }
            time::sleep(interval).await;
        }
    };
    time::timeout(budget, poll).await.is_ok()
}
