//! Logger bootstrap and module-gated logging macros.
//!
//! Modules on the tick and connection paths define a local switch and log
//! through the macros below, so a noisy module can be silenced without
//! touching `RUST_LOG`:
//!
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//!
//! use crate::{log_info, log_warn};
//!
//! log_info!("captured {} coin rows", rows.len());
//! ```

use std::sync::Once;

use log::LevelFilter;

static INIT: Once = Once::new();

/// Installs `env_logger` once per process.
///
/// `RUST_LOG` takes precedence over `default_level`. Later calls are no-ops,
/// which lets tests and embedders call it freely.
pub fn init_logging(default_level: LevelFilter) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(default_level);
        if let Ok(spec) = std::env::var("RUST_LOG") {
            builder.parse_filters(&spec);
        }
        if builder.try_init().is_err() {
            log::debug!("a global logger was already installed");
        }
    });
}

/// Info-level log, emitted only when the calling module's `ENABLE_LOGS` is set.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// Warn-level counterpart of [`log_info!`].
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// Error-level counterpart of [`log_info!`].
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}
