//! Error types for the fingwit authentication layer

use std::io;

use thiserror::Error;

/// Result type alias for authentication operations
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors that can occur while serving an attempt
///
/// These never cross the engine boundary. `DecisionEngine::authenticate`
/// converts each one to an `Outcome`.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Template store unreadable or holding a corrupt record
    #[error("Template store unavailable: {0}")]
    StoreUnavailable(String),

    /// Transient store failure, worth exactly one retry
    #[error("Template store contended: {0}")]
    StoreContended(String),

    /// No templates enrolled for the user
    #[error("No templates enrolled for user: {0}")]
    UserUnknown(String),

    /// Operation exceeded its time bound
    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    /// Lockout state could not be locked, read, or persisted
    #[error("Session guard unavailable: {0}")]
    GuardUnavailable(String),

    /// Configuration rejected at construction
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Core library error
    #[error("Core error: {0}")]
    Core(#[from] fingwit_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AuthError {
    /// Whether a single retry may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::StoreContended(_))
    }

    /// Classify an I/O error raised while reading the template store
    pub fn from_store_io(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut => {
                AuthError::StoreContended(e.to_string())
            }
            _ => AuthError::StoreUnavailable(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(e: serde_json::Error) -> Self {
        AuthError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for AuthError {
    fn from(e: toml::de::Error) -> Self {
        AuthError::ConfigInvalid(e.to_string())
    }
}
