//! Error taxonomy for the capture pipeline.
//!
//! `PipelineError` is fatal to a run. `CaptureError` is scoped to one target:
//! the orchestrator records it and moves on to the next target.
//!
//! Messages never repeat their `#[source]`; print the chain (`{:#}` on an
//! `anyhow::Error`, or walk `source()`) to see the cause.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("browser error")]
    Browser(#[source] anyhow::Error),

    #[error("metadata store error")]
    Store(#[source] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("page did not finish loading within {0:?}")]
    NavigationTimeout(Duration),

    #[error("navigation failed")]
    Navigation(#[source] anyhow::Error),

    #[error("element `{selector}` not visible within {waited:?}")]
    ElementNotFound { selector: String, waited: Duration },

    #[error("no ticker symbol on the page or in {url}")]
    SymbolUnavailable { url: String },

    #[error("duplicate check failed")]
    DedupCheck(#[source] anyhow::Error),

    #[error("screenshot failed")]
    Screenshot(#[source] anyhow::Error),

    #[error("screenshot did not complete within {0:?}")]
    ScreenshotTimeout(Duration),

    #[error("failed to write image {path}")]
    ImageWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("post-processing failed")]
    PostProcess(#[source] anyhow::Error),

    /// The image is on disk but no metadata row references it.
    #[error("metadata insert failed, orphaned image {path}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("capture panicked: {0}")]
    Panicked(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn chain_names_each_cause_once() {
        let err = anyhow::Error::from(PipelineError::Store(anyhow!("disk I/O error")));
        let text = format!("{err:#}");
        assert_eq!(text, "metadata store error: disk I/O error");
    }

    #[test]
    fn persistence_error_keeps_cause_as_source() {
        let err = CaptureError::Persistence {
            path: PathBuf::from("data/images/AAPL.png"),
            source: anyhow!("database is locked"),
        };
        assert_eq!(err.to_string(), "metadata insert failed, orphaned image data/images/AAPL.png");
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("database is locked"));
    }
}
