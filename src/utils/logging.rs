//! Logger setup plus per-module switchable logging.
//!
//! The `log_*!` macros expand against an `ENABLE_LOGS` const that must be in
//! scope at the call site, so a noisy module can be silenced with a one-line
//! change:
//!
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//!
//! use crate::log_info;
//! log_info!("captured {}", symbol);
//! ```

use env_logger::Builder;
use log::LevelFilter;

/// Installs the global logger. Info by default; `RUST_LOG` overrides.
/// Calling it again is a no-op.
pub fn init() {
    let _ = Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_millis()
        .try_init();
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}
