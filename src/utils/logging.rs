//! Logging setup plus switchable logging macros for chatty modules.
//!
//! Modules that log on every sample or socket frame define a module-level
//! flag and use the macros below, so a single module can be silenced
//! without touching `RUST_LOG`:
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//!
//! use crate::{log_debug, log_info, log_warn, log_error};
//!
//! log_info!("only logs when ENABLE_LOGS is true");
//! ```

use std::sync::Once;

static INIT: Once = Once::new();

/// Installs `env_logger` once. `RUST_LOG` overrides the default `info`
/// level; `FIELDTRACK_DEBUG=1` raises this crate to `debug`.
pub fn init_logging() {
    INIT.call_once(|| {
        let debug_mode = std::env::var("FIELDTRACK_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let mut builder = env_logger::Builder::new();
        builder.filter_level(log::LevelFilter::Info);
        if debug_mode {
            builder.filter_module("fieldtrack", log::LevelFilter::Debug);
        }
        builder.parse_default_env();
        // A host app may already have installed a logger.
        let _ = builder.try_init();
    });
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
