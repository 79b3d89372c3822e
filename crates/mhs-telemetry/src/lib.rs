//! # MHS Telemetry
//!
//! Logging setup for the Message Handling Service.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mhs_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(TelemetryConfig::from_env())?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `MHS_SERVICE_NAME` | `mhs` | Service name attached to startup logs |
//! | `MHS_LOG_LEVEL` | `info` | Log level filter (falls back to `RUST_LOG`) |
//! | `MHS_JSON_LOGS` | `false` | Emit JSON lines instead of human output |
//! | `MHS_CONSOLE_OUTPUT` | `true` | Disable to silence stdout logging |

#![warn(missing_docs)]

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::LoggingGuard;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// The log filter directive could not be parsed.
    #[error("Invalid log filter: {0}")]
    Filter(String),

    /// A global subscriber was already installed.
    #[error("Failed to install subscriber: {0}")]
    Subscriber(String),
}

/// Initialize structured logging.
///
/// Returns a guard that should be held for the lifetime of the application.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let logging = logging::init_logging(&config)?;
    Ok(TelemetryGuard {
        _logging: logging,
        service_name: config.service_name,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    _logging: LoggingGuard,
    service_name: String,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!(service = %self.service_name, "Shutting down telemetry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_service_name() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "mhs");
    }
}
