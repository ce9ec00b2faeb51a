//! Structured audit log
//!
//! One JSON entry per attempt, emitted on the `fingwit::audit` tracing
//! target so it can be routed apart from diagnostic logs. Entries never
//! carry feature data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use fingwit_core::{classify, Outcome, UserId};

/// Tracing target for audit entries
pub const AUDIT_TARGET: &str = "fingwit::audit";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub service: String,
    pub outcome: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditEntry {
    pub fn from_outcome(
        timestamp: DateTime<Utc>,
        user: &UserId,
        service: &str,
        outcome: &Outcome,
    ) -> Self {
        let detail = match outcome {
            Outcome::LockedOut { retry_after } => {
                Some(format!("retry_after_secs={}", retry_after.as_secs()))
            }
            Outcome::Unavailable { reason } => Some(format!("reason={}", reason)),
            _ => None,
        };

        Self {
            timestamp,
            user: user.to_string(),
            service: service.to_string(),
            outcome: outcome.kind().to_string(),
            code: classify(outcome).as_str().to_string(),
            score: outcome.score().map(|s| s.value()),
            template_id: outcome.template_id().map(|id| id.to_string()),
            detail,
        }
    }
}

pub struct AuditLog;

impl AuditLog {
    pub fn log(entry: &AuditEntry) {
        if let Ok(json) = serde_json::to_string(entry) {
            info!(target: AUDIT_TARGET, "{}", json);
        }
    }
}
