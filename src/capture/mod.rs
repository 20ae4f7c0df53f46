//! Per-target capture state machine.

mod extract;
#[cfg(test)]
mod fake;
mod workflow;

pub use extract::{symbol_from_url, Extraction};
pub use workflow::{
    image_file_name, CaptureOutcome, CaptureSettings, CaptureStage, CaptureWorkflow,
    CapturedTarget, TargetFailure,
};
