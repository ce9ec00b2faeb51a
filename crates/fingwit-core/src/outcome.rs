//! Authentication outcomes and their external codes
//!
//! `Outcome` is the closed set of results of one attempt. `classify` maps
//! every variant to exactly one `ExternalCode`; there is no catch-all arm,
//! so adding a variant forces a decision here.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::matcher::Score;
use crate::types::TemplateId;

/// Why an attempt could not be evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    /// Template store unreadable or corrupt
    Store,
    /// Store or capture did not answer in time
    Timeout,
    /// Lockout state could not be read, locked, or persisted
    Guard,
    /// No usable live scan
    Scan,
    /// Session context rules out biometric auth (remote or encrypted home)
    Skipped,
    /// Unclassified internal failure
    Internal,
}

impl UnavailableReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnavailableReason::Store => "store",
            UnavailableReason::Timeout => "timeout",
            UnavailableReason::Guard => "guard",
            UnavailableReason::Scan => "scan",
            UnavailableReason::Skipped => "skipped",
            UnavailableReason::Internal => "internal",
        }
    }
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single authentication attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Matched { template_id: TemplateId, score: Score },
    NoMatch { best: Score },
    /// Best score fell inside the band just below the threshold
    Inconclusive { score: Score },
    LockedOut { retry_after: Duration },
    Unavailable { reason: UnavailableReason },
    UserUnknown,
}

impl Outcome {
    /// Stable name used in logs and audit entries
    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Matched { .. } => "matched",
            Outcome::NoMatch { .. } => "no_match",
            Outcome::Inconclusive { .. } => "inconclusive",
            Outcome::LockedOut { .. } => "locked_out",
            Outcome::Unavailable { .. } => "unavailable",
            Outcome::UserUnknown => "user_unknown",
        }
    }

    /// Score that decided the attempt, if scoring happened
    pub fn score(&self) -> Option<Score> {
        match self {
            Outcome::Matched { score, .. } => Some(*score),
            Outcome::NoMatch { best } => Some(*best),
            Outcome::Inconclusive { score } => Some(*score),
            _ => None,
        }
    }

    pub fn template_id(&self) -> Option<TemplateId> {
        match self {
            Outcome::Matched { template_id, .. } => Some(*template_id),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Matched { .. })
    }

    /// How the attempt counts toward lockout
    ///
    /// `Some(true)` resets the counter, `Some(false)` counts a failure, and
    /// `None` leaves lockout state untouched.
    pub fn attempt_result(&self) -> Option<bool> {
        match self {
            Outcome::Matched { .. } => Some(true),
            Outcome::NoMatch { .. } | Outcome::Inconclusive { .. } => Some(false),
            Outcome::LockedOut { .. } | Outcome::Unavailable { .. } | Outcome::UserUnknown => None,
        }
    }

    /// Whether a re-scan could change the result
    pub fn is_retryable(&self) -> bool {
        matches!(self, Outcome::NoMatch { .. } | Outcome::Inconclusive { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Matched { template_id, score } => {
                write!(f, "matched template {} (score {})", template_id.short(), score)
            }
            Outcome::NoMatch { best } => write!(f, "no match (best {})", best),
            Outcome::Inconclusive { score } => write!(f, "inconclusive (score {})", score),
            Outcome::LockedOut { retry_after } => {
                write!(f, "locked out (retry in {}s)", retry_after.as_secs())
            }
            Outcome::Unavailable { reason } => write!(f, "unavailable ({})", reason),
            Outcome::UserUnknown => f.write_str("user unknown"),
        }
    }
}

/// Stable codes returned across the PAM boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExternalCode {
    Success,
    AuthErr,
    AuthinfoUnavail,
    UserUnknown,
}

impl ExternalCode {
    /// Numeric Linux-PAM return value
    pub fn pam_code(&self) -> i32 {
        match self {
            ExternalCode::Success => 0,
            ExternalCode::AuthErr => 7,
            ExternalCode::AuthinfoUnavail => 9,
            ExternalCode::UserUnknown => 10,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExternalCode::Success => "SUCCESS",
            ExternalCode::AuthErr => "AUTH_ERR",
            ExternalCode::AuthinfoUnavail => "AUTHINFO_UNAVAIL",
            ExternalCode::UserUnknown => "USER_UNKNOWN",
        }
    }

    /// Whether the PAM stack may fall through to another method
    pub fn allows_fallback(&self) -> bool {
        matches!(self, ExternalCode::AuthinfoUnavail)
    }
}

impl fmt::Display for ExternalCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map an outcome to its external code
///
/// `Inconclusive` is denied like `NoMatch`; the distinction only survives in
/// the audit log. `LockedOut` reports unavailability so password fallback
/// stays reachable.
pub fn classify(outcome: &Outcome) -> ExternalCode {
    match outcome {
        Outcome::Matched { .. } => ExternalCode::Success,
        Outcome::NoMatch { .. } => ExternalCode::AuthErr,
        Outcome::Inconclusive { .. } => ExternalCode::AuthErr,
        Outcome::Unavailable { .. } => ExternalCode::AuthinfoUnavail,
        Outcome::UserUnknown => ExternalCode::UserUnknown,
        Outcome::LockedOut { .. } => ExternalCode::AuthinfoUnavail,
    }
}
