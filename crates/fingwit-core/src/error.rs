//! Error types for the fingwit core library

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid user identity: {0}")]
    InvalidUser(String),

    #[error("Invalid finger name: {0}")]
    InvalidFinger(String),

    #[error("Invalid feature vector: expected {expected} values, got {actual}")]
    FeatureLength { expected: usize, actual: usize },

    #[error("Feature vector contains non-finite values")]
    NonFiniteFeature,

    #[error("Invalid magic: expected {expected}, found {found}")]
    InvalidMagic { expected: String, found: String },

    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u32),

    #[error("Checksum mismatch in record for {0}")]
    ChecksumMismatch(String),

    #[error("Owner mismatch: expected {expected}, found {found}")]
    OwnerMismatch { expected: String, found: String },

    #[error("Too many templates: {count} exceeds limit of {max}")]
    TooManyTemplates { count: usize, max: usize },

    #[error("Duplicate template: {0}")]
    DuplicateTemplate(String),

    #[error("Invalid match policy: {0}")]
    InvalidPolicy(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
