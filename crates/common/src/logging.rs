// Stepper - Thread-plan execution engine
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Logging configuration for Stepper components
//!
//! Provides centralized logging setup with:
//! - Structured console output
//! - Optional file logging to a temporary directory with daily rotation
//! - Environment variable support (RUST_LOG)
//! - A once-only initializer for tests

use eyre::Result;
use std::{env, fs, path::PathBuf, sync::Once};
use tracing::Level;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, time::LocalTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Directory under the system temp folder that holds component logs.
pub const LOG_DIR_NAME: &str = "stepper-logs";

/// Initialize logging for a Stepper component
///
/// Sets up a console layer honouring `RUST_LOG` (default `info`) and, when
/// `enable_file_logging` is set, a second plain-text layer writing to
/// `$TMP/stepper-logs/<component>/<component>.log` with daily rotation.
///
/// # Arguments
/// * `component_name` - Name of the component (e.g., "stepper")
/// * `enable_file_logging` - Whether to also write log files
///
/// # Examples
/// ```rust
/// use stepper_common::logging;
///
/// fn main() -> eyre::Result<()> {
///     logging::init_logging("stepper", false)?;
///     tracing::info!("Application started");
///     Ok(())
/// }
/// ```
pub fn init_logging(component_name: &str, enable_file_logging: bool) -> Result<()> {
    let env_filter = default_filter("info")?;

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_timer(LocalTime::rfc_3339())
        .with_writer(std::io::stderr)
        .with_ansi(true);

    if enable_file_logging {
        let log_dir = create_log_directory(component_name)?;

        let file_appender = rolling::daily(&log_dir, format!("{component_name}.log"));
        let (non_blocking_appender, guard) = non_blocking(file_appender);

        // The writer must outlive every subscriber; leak the guard for the process lifetime.
        std::mem::forget(guard);

        let file_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_timer(LocalTime::rfc_3339())
            .with_ansi(false)
            .with_writer(non_blocking_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer.with_filter(filter_for_file()))
            .try_init()
            .map_err(|e| eyre::eyre!("Failed to initialize tracing subscriber: {e}"))?;

        tracing::info!(
            component = component_name,
            log_dir = %log_dir.display(),
            "Logging initialized with console and file output"
        );
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init()
            .map_err(|e| eyre::eyre!("Failed to initialize tracing subscriber: {e}"))?;

        tracing::debug!(component = component_name, "Logging initialized with console output only");
    }

    Ok(())
}

/// Create the log directory for a component in the system temp folder
fn create_log_directory(component_name: &str) -> Result<PathBuf> {
    let log_dir = env::temp_dir().join(LOG_DIR_NAME).join(component_name);
    fs::create_dir_all(&log_dir)?;
    Ok(log_dir)
}

/// `RUST_LOG` if set, otherwise `fallback`
fn default_filter(fallback: &str) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .map_err(|e| eyre::eyre!("Failed to create environment filter: {e}"))
}

/// Filter for file output - stepping decisions are logged at debug level
fn filter_for_file() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
}

/// Initialize simple logging (console only, compact format)
///
/// Useful for tests and small utilities.
///
/// # Arguments
/// * `level` - The default log level to use when `RUST_LOG` is unset
pub fn init_simple_logging(level: Level) -> Result<()> {
    let env_filter = default_filter(level.as_str())?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_test_writer()
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|e| eyre::eyre!("Failed to initialize simple logging: {e}"))?;

    Ok(())
}

// Global test logging initialization - ensures logging is only set up once across all tests
static TEST_LOGGING_INIT: Once = Once::new();

/// Safe logging initialization for tests - can be called multiple times
///
/// Console-only output at `default_level` (INFO when `None`), respecting
/// `RUST_LOG`. Initialization happens once per test process.
///
/// # Usage
/// ```rust
/// use stepper_common::logging;
///
/// logging::ensure_test_logging(None);
/// tracing::info!("This will work safely in any test!");
/// ```
pub fn ensure_test_logging(default_level: Option<Level>) {
    TEST_LOGGING_INIT.call_once(|| {
        let default_level = default_level.unwrap_or(Level::INFO);
        // A subscriber may already be installed by the harness, which is fine.
        let _ = init_simple_logging(default_level);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{debug, info, warn};

    #[test]
    fn test_logging_functions_work() {
        ensure_test_logging(None);

        info!("Test info message");
        warn!("Test warning message");
        debug!("Test debug message");
    }

    #[test]
    fn test_log_directory_creation() {
        let log_dir = create_log_directory("test-component").unwrap();
        assert!(log_dir.exists());
        assert!(log_dir.to_string_lossy().contains(LOG_DIR_NAME));
        assert!(log_dir.to_string_lossy().contains("test-component"));
    }

    #[test]
    fn test_repeated_initialization_is_graceful() {
        ensure_test_logging(None);

        // A subscriber is already installed, so both attempts must fail without panicking.
        assert!(init_logging("test-repeat-1", false).is_err());
        assert!(init_simple_logging(Level::DEBUG).is_err());

        info!("Test logging after repeated init attempts");
    }
}
