//! # Error Taxonomy
//!
//! Every failure in the crate is one of five kinds. Each kind has a single
//! handling policy, applied by the [`crate::coordinator::Coordinator`]:
//!
//! | Kind            | At setup             | During a poll                    |
//! |-----------------|----------------------|----------------------------------|
//! | `Auth`          | fatal                | poll fails, last good data kept  |
//! | `Timeout`       | not ready, retry     | poll fails, last good data kept  |
//! | `Data`          | n/a                  | poll fails, last good data kept  |
//! | `Configuration` | fatal                | poll fails, last good data kept  |
//! | `Unhandled`     | not ready, retry     | poll fails, last good data kept  |
//!
//! Nothing in the core is transient, so nothing in the core retries. Only the
//! credential check at startup waits out `Timeout` and `Unhandled`, see
//! [`SensitError::is_not_ready`].

use std::time::Duration;
use thiserror::Error;

/// Errors raised while fetching or processing tank data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensitError {
    /// The service rejected the account credentials
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The whole fetch did not finish within the configured timeout
    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Upstream data violates the reading contract (order, range, format)
    #[error("invalid tank data: {0}")]
    Data(String),

    /// Settings are unusable, or a timestamp cannot exist in the configured zone
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Any other transport or decoding failure
    #[error("unhandled error: {0}")]
    Unhandled(String),
}

impl SensitError {
    /// Short label used in log lines and the report banner.
    pub fn kind(&self) -> &'static str {
        match self {
            SensitError::Auth(_) => "auth",
            SensitError::Timeout(_) => "timeout",
            SensitError::Data(_) => "data",
            SensitError::Configuration(_) => "configuration",
            SensitError::Unhandled(_) => "unhandled",
        }
    }

    /// True when setup should be retried later instead of giving up.
    ///
    /// `Auth` and `Configuration` need the user to change something;
    /// `Timeout` and `Unhandled` usually mean the service is not reachable yet.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, SensitError::Timeout(_) | SensitError::Unhandled(_))
    }
}

impl From<std::io::Error> for SensitError {
    fn from(e: std::io::Error) -> Self {
        SensitError::Unhandled(format!("IO: {e}"))
    }
}

impl From<serde_json::Error> for SensitError {
    fn from(e: serde_json::Error) -> Self {
        SensitError::Data(format!("JSON: {e}"))
    }
}
