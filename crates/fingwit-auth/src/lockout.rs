//! Lockout policy and persisted per-user lockout state
//!
//! A user is locked out once `max_attempts` consecutive failures have been
//! recorded and the most recent one is younger than the lockout window.
//! When the window has elapsed since the last failure the counter starts
//! over from zero.
//!
//! - Preset `default`: 5 failures, 5 minute window
//! - Preset `strict`: 3 failures, 15 minute window
//! - Preset `lenient`: 10 failures, 1 minute window

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

/// Current lockout state format version
pub const LOCKOUT_STATE_VERSION: u32 = 1;

/// Lockout policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockoutPolicy {
    /// Consecutive failures that trigger a lockout
    pub max_attempts: u32,
    /// Seconds a lockout lasts, measured from the last failure
    pub lockout_window_secs: u64,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lockout_window_secs: 300,
        }
    }
}

impl LockoutPolicy {
    /// Create a strict policy (fewer attempts, longer window)
    pub fn strict() -> Self {
        Self {
            max_attempts: 3,
            lockout_window_secs: 900,
        }
    }

    /// Create a lenient policy (more attempts allowed)
    pub fn lenient() -> Self {
        Self {
            max_attempts: 10,
            lockout_window_secs: 60,
        }
    }

    pub fn window(&self) -> chrono::Duration {
        i64::try_from(self.lockout_window_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(AuthError::ConfigInvalid(
                "lockout max_attempts must be at least 1".to_string(),
            ));
        }
        if self.lockout_window_secs == 0 {
            return Err(AuthError::ConfigInvalid(
                "lockout window must be at least 1 second".to_string(),
            ));
        }
        if self.lockout_window_secs > i64::MAX as u64 / 1000 {
            return Err(AuthError::ConfigInvalid(format!(
                "lockout window of {} seconds is out of range",
                self.lockout_window_secs
            )));
        }
        Ok(())
    }

    /// Human-readable description of a user's lockout state
    pub fn describe(&self, state: &LockoutState, now: DateTime<Utc>) -> String {
        match state.lockout_remaining(self, now) {
            Some(remaining) => {
                let secs = remaining.as_secs();
                if secs < 60 {
                    format!("Locked for {} seconds", secs)
                } else if secs < 3600 {
                    format!("Locked for {} minutes", secs / 60)
                } else {
                    format!("Locked for {} hours", secs / 3600)
                }
            }
            None => format!(
                "{} attempts remaining",
                state.attempts_remaining(self, now)
            ),
        }
    }
}

/// Per-user lockout state (persisted to disk)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutState {
    /// Version for future migrations
    version: u32,
    /// Consecutive failed attempts
    failed_attempts: u32,
    /// Time of the most recent failure
    last_failure: Option<DateTime<Utc>>,
}

impl Default for LockoutState {
    fn default() -> Self {
        Self {
            version: LOCKOUT_STATE_VERSION,
            failed_attempts: 0,
            last_failure: None,
        }
    }
}

impl LockoutState {
    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn last_failure(&self) -> Option<DateTime<Utc>> {
        self.last_failure
    }

    /// Whether the window has elapsed since the last failure
    fn window_elapsed(&self, policy: &LockoutPolicy, now: DateTime<Utc>) -> bool {
        match self.last_failure {
            Some(last) => now - last >= policy.window(),
            None => true,
        }
    }

    /// Reset the counter if the window has elapsed since the last failure
    ///
    /// Returns true if the state changed.
    pub fn expire_if_elapsed(&mut self, policy: &LockoutPolicy, now: DateTime<Utc>) -> bool {
        if self.failed_attempts > 0 && self.window_elapsed(policy, now) {
            self.failed_attempts = 0;
            self.last_failure = None;
            return true;
        }
        false
    }

    /// Count a failed attempt
    pub fn record_failure(&mut self, policy: &LockoutPolicy, now: DateTime<Utc>) {
        self.expire_if_elapsed(policy, now);
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        self.last_failure = Some(now);
    }

    /// Clear the counter after a successful attempt
    pub fn record_success(&mut self) {
        self.failed_attempts = 0;
        self.last_failure = None;
    }

    pub fn is_locked(&self, policy: &LockoutPolicy, now: DateTime<Utc>) -> bool {
        self.lockout_remaining(policy, now).is_some()
    }

    /// Time until the lockout lifts, or None if not locked
    pub fn lockout_remaining(&self, policy: &LockoutPolicy, now: DateTime<Utc>) -> Option<Duration> {
        if self.failed_attempts < policy.max_attempts {
            return None;
        }
        let last = self.last_failure?;
        let elapsed = now - last;
        let window = policy.window();
        if elapsed >= window {
            return None;
        }
        // A clock that moved backwards never extends the lockout past one window
        let remaining = (window - elapsed.max(chrono::Duration::zero())).min(window);
        remaining.to_std().ok()
    }

    /// Attempts left before the lockout engages
    pub fn attempts_remaining(&self, policy: &LockoutPolicy, now: DateTime<Utc>) -> u32 {
        if self.window_elapsed(policy, now) {
            return policy.max_attempts;
        }
        policy.max_attempts.saturating_sub(self.failed_attempts)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let state: Self = serde_json::from_slice(bytes)?;
        if state.version == 0 || state.version > LOCKOUT_STATE_VERSION {
            return Err(AuthError::GuardUnavailable(format!(
                "unsupported lockout state version {}",
                state.version
            )));
        }
        Ok(state)
    }
}
