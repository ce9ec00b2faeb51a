//! Fingwit Core - Shared types, template format, and matching primitives
//!
//! This crate provides the foundational types for the fingwit fingerprint
//! authentication backend: user identities, enrolled templates and their
//! persisted record format, live scans, the similarity matcher, and the
//! closed set of authentication outcomes with their external codes.

pub mod error;
pub mod matcher;
pub mod outcome;
pub mod policy;
pub mod scan;
pub mod template;
pub mod types;

pub use error::{Error, Result};
pub use matcher::{select_best, Candidate, CosineMatcher, Matcher, Score};
pub use outcome::{classify, ExternalCode, Outcome, UnavailableReason};
pub use policy::MatchPolicy;
pub use scan::Scan;
pub use template::{FeatureVector, Template, TemplateRecord, RECORD_MAGIC};
pub use types::{Finger, TemplateId, UserId};

/// Persisted format version for templates and template records
pub const FORMAT_VERSION: u32 = 1;

/// Number of values in every feature vector
pub const FEATURE_DIM: usize = 128;

/// Maximum number of enrolled templates per user (one per finger)
pub const MAX_TEMPLATES_PER_USER: usize = 10;

/// Maximum length of a user name in bytes
pub const MAX_USER_NAME_LEN: usize = 256;

/// Default similarity required for a match
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.8;

/// Default width of the inconclusive band below the threshold
pub const DEFAULT_INCONCLUSIVE_MARGIN: f64 = 0.05;
