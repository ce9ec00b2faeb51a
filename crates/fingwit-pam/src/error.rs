//! Error types for the PAM adapter

use std::io;
use std::time::Duration;

use thiserror::Error;

use fingwit_auth::AuthError;
use fingwit_core::{Outcome, UnavailableReason};

/// Result type alias for settings resolution
pub type Result<T> = std::result::Result<T, SettingsError>;

/// Errors that make the module unusable as configured (`PAM_SERVICE_ERR`)
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Invalid module argument {key}={value}: {reason}")]
    InvalidArgument {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Module argument {0} requires a value")]
    MissingValue(String),

    #[error("Cannot read config {path}: {source}")]
    ConfigUnreadable {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Malformed config: {0}")]
    ConfigMalformed(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<AuthError> for SettingsError {
    fn from(e: AuthError) -> Self {
        SettingsError::Invalid(e.to_string())
    }
}

/// Errors while acquiring a live scan
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("No scan arrived within {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Scan is stale ({age_secs}s old)")]
    Stale { age_secs: i64 },

    #[error("Scan is dated {ahead_secs}s in the future")]
    FutureDated { ahead_secs: i64 },

    #[error("Malformed scan: {0}")]
    Malformed(#[from] fingwit_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl CaptureError {
    /// Outcome reported when no scan could be evaluated
    pub fn outcome(&self) -> Outcome {
        let reason = match self {
            CaptureError::Timeout(_) => UnavailableReason::Timeout,
            _ => UnavailableReason::Scan,
        };
        Outcome::Unavailable { reason }
    }
}
