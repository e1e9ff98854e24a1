//! # Keystone Telemetry
//!
//! Structured logging for Keystone hosts, built on `tracing`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use keystone_telemetry::{init_logging, TelemetryConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&TelemetryConfig::from_env())?;
//!     // ...
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OTEL_SERVICE_NAME` | `keystone` | Service name in log lines |
//! | `KS_LOG_LEVEL` / `RUST_LOG` | `info` | Filter directive |
//! | `KS_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `KS_JSON_LOGS` | `false` (`true` in containers) | JSON lines output |

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::{env_filter, init_logging};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,

    #[error("invalid log filter: {0}")]
    InvalidFilter(String),
}
