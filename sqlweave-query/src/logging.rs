//! Logging setup for the composition engine.
//!
//! Library code logs through `tracing` unconditionally; this module only
//! decides whether a subscriber gets installed and how it formats output.
//!
//! # Environment Variables
//!
//! - `SQLWEAVE_DEBUG=true|1|yes` - Enable debug logging
//! - `SQLWEAVE_LOG_LEVEL=trace|debug|info|warn|error` - Set a specific level
//! - `SQLWEAVE_LOG_FORMAT=json|pretty|compact` - Output format (default: json)
//!
//! ```rust,no_run
//! use sqlweave_query::logging;
//!
//! logging::init();
//! ```

use std::env;
use std::sync::Once;

static INIT: Once = Once::new();

/// Check if debug logging is enabled via `SQLWEAVE_DEBUG`.
#[inline]
pub fn is_debug_enabled() -> bool {
    env::var("SQLWEAVE_DEBUG")
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

/// Get the configured log level from `SQLWEAVE_LOG_LEVEL`.
///
/// Defaults to "debug" if `SQLWEAVE_DEBUG` is enabled, otherwise "warn".
pub fn get_log_level() -> &'static str {
    let fallback = if is_debug_enabled() { "debug" } else { "warn" };
    match env::var("SQLWEAVE_LOG_LEVEL") {
        Ok(level) => match level.to_lowercase().as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "info" => "info",
            "warn" => "warn",
            "error" => "error",
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

/// Get the configured log format from `SQLWEAVE_LOG_FORMAT`.
pub fn get_log_format() -> &'static str {
    env::var("SQLWEAVE_LOG_FORMAT")
        .map(|f| match f.to_lowercase().as_str() {
            "pretty" => "pretty",
            "compact" => "compact",
            _ => "json",
        })
        .unwrap_or("json")
}

/// Initialize the logging system.
///
/// Subsequent calls are no-ops. Nothing is installed unless debug logging or
/// an explicit level was requested.
pub fn init() {
    INIT.call_once(|| {
        if !is_debug_enabled() && env::var("SQLWEAVE_LOG_LEVEL").is_err() {
            return;
        }

        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let level = get_log_level();
            let filter = EnvFilter::try_new(format!("sqlweave={},sqlweave_query={}", level, level))
                .unwrap_or_else(|_| EnvFilter::new("warn"));

            let registry = tracing_subscriber::registry().with(filter);
            let installed = match get_log_format() {
                "json" => registry.with(fmt::layer().json()).try_init(),
                "compact" => registry.with(fmt::layer().compact()).try_init(),
                _ => registry.with(fmt::layer().pretty()).try_init(),
            };

            if installed.is_ok() {
                tracing::info!(
                    level = level,
                    format = get_log_format(),
                    "sqlweave logging initialized"
                );
            }
        }
    });
}

/// Initialize logging with a specific level.
///
/// # Safety
///
/// This function modifies environment variables, which is unsafe in
/// multi-threaded programs. Call it before spawning threads.
pub fn init_with_level(level: &str) {
    // SAFETY: documented as a startup-only call.
    unsafe {
        env::set_var("SQLWEAVE_LOG_LEVEL", level);
    }
    init();
}

/// Initialize debug logging, equivalent to `SQLWEAVE_DEBUG=true` plus [`init`].
///
/// # Safety
///
/// Same caveat as [`init_with_level`].
pub fn init_debug() {
    // SAFETY: documented as a startup-only call.
    unsafe {
        env::set_var("SQLWEAVE_DEBUG", "true");
    }
    init();
}

/// Debug logging that only fires when `SQLWEAVE_DEBUG` is enabled.
#[macro_export]
macro_rules! sqlweave_debug {
    ($($arg:tt)*) => {
        if $crate::logging::is_debug_enabled() {
            tracing::debug!($($arg)*);
        }
    };
}

/// Trace logging that only fires when `SQLWEAVE_DEBUG` is enabled.
#[macro_export]
macro_rules! sqlweave_trace {
    ($($arg:tt)*) => {
        if $crate::logging::is_debug_enabled() {
            tracing::trace!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_disabled_by_default() {
        // SAFETY: test-local env mutation
        unsafe {
            env::remove_var("SQLWEAVE_DEBUG");
        }
        assert!(!is_debug_enabled());
    }

    #[test]
    fn test_log_format_default() {
        // SAFETY: test-local env mutation
        unsafe {
            env::remove_var("SQLWEAVE_LOG_FORMAT");
        }
        assert_eq!(get_log_format(), "json");
    }
}
