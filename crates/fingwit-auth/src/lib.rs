//! Fingwit Auth - Decision engine and its persistent state
//!
//! This crate provides:
//! - File-backed template storage with atomic snapshots
//! - Per-user lockout with cross-process serialization
//! - The decision engine that turns a scan into an `Outcome`
//! - Configuration and the structured audit log

mod atomic;
pub mod audit;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod guard;
pub mod lockout;
pub mod store;

pub use audit::{AuditEntry, AuditLog, AUDIT_TARGET};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AuthConfig;
pub use engine::DecisionEngine;
pub use error::{AuthError, Result};
pub use guard::{Admission, AttemptPermit, SessionGuard};
pub use lockout::{LockoutPolicy, LockoutState};
pub use store::{FileTemplateStore, TemplateStore};
