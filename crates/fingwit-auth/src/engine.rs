//! Decision engine
//!
//! Drives one attempt through `Start -> Loading -> Scoring -> Deciding` and
//! always ends in an `Outcome`:
//!
//! ```text
//! Start ──guard──> LockedOut | Unavailable{Guard}
//!   │
//!   v
//! Loading ──────> UserUnknown | Unavailable{Store|Timeout}   (no lockout update)
//!   │
//!   v
//! Scoring ─> Deciding ──record──> Matched | NoMatch | Inconclusive
//!                           └───> Unavailable{Guard}        (record failed)
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use fingwit_core::{
    select_best, CosineMatcher, MatchPolicy, Matcher, Outcome, Scan, Template, UnavailableReason,
    UserId,
};

use crate::audit::{AuditEntry, AuditLog};
use crate::clock::{Clock, SystemClock};
use crate::config::AuthConfig;
use crate::error::{AuthError, Result};
use crate::guard::{Admission, SessionGuard};
use crate::store::{FileTemplateStore, TemplateStore};

/// Evaluates authentication attempts
pub struct DecisionEngine<M: Matcher = CosineMatcher> {
    store: Arc<dyn TemplateStore>,
    guard: Arc<SessionGuard>,
    matcher: M,
    policy: MatchPolicy,
    store_timeout: Duration,
}

impl DecisionEngine<CosineMatcher> {
    /// Build an engine over the file store described by `config`
    ///
    /// Only validation can fail here; the store directories are created on
    /// first write.
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        Self::from_config_with_clock(config, Arc::new(SystemClock))
    }

    pub fn from_config_with_clock(config: &AuthConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let store = FileTemplateStore::with_clock(config.templates_dir(), Arc::clone(&clock));
        let guard = SessionGuard::new(
            config.lockout_dir(),
            config.lockout,
            clock,
            config.guard_timeout(),
        );

        Ok(Self::with_parts(
            Arc::new(store),
            Arc::new(guard),
            CosineMatcher,
            config.match_policy()?,
            config.store_timeout(),
        ))
    }
}

impl<M: Matcher> DecisionEngine<M> {
    /// Assemble an engine from explicit parts
    pub fn with_parts(
        store: Arc<dyn TemplateStore>,
        guard: Arc<SessionGuard>,
        matcher: M,
        policy: MatchPolicy,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            guard,
            matcher,
            policy,
            store_timeout,
        }
    }

    pub fn guard(&self) -> &Arc<SessionGuard> {
        &self.guard
    }

    pub fn policy(&self) -> &MatchPolicy {
        &self.policy
    }

    /// Authenticate `user` against a live scan
    ///
    /// Total: every failure becomes an `Outcome`. The scan is consumed and
    /// its features are zeroized when this returns.
    pub async fn authenticate(&self, user: &UserId, service: &str, scan: Scan) -> Outcome {
        let outcome = self.evaluate(user, scan).await;

        match outcome {
            Outcome::Matched { .. } => info!("{} authenticated for {}: {}", user, service, outcome),
            Outcome::Unavailable { .. } => warn!("{} via {}: {}", user, service, outcome),
            _ => info!("{} rejected for {}: {}", user, service, outcome),
        }

        let entry = AuditEntry::from_outcome(self.guard.clock().now(), user, service, &outcome);
        AuditLog::log(&entry);

        outcome
    }

    async fn evaluate(&self, user: &UserId, scan: Scan) -> Outcome {
        debug!(%user, state = "start");
        let permit = match self.guard.check_and_record(user).await {
            Ok(Admission::Admitted(permit)) => permit,
            Ok(Admission::LockedOut { retry_after }) => return Outcome::LockedOut { retry_after },
            Err(e) => {
                error!("Session guard failed for {}: {}", user, e);
                return Outcome::Unavailable {
                    reason: UnavailableReason::Guard,
                };
            }
        };

        debug!(%user, state = "loading");
        let templates = match self.load_with_retry(user).await {
            Ok(templates) => templates,
            Err(e) => return load_failure(user, e),
        };

        debug!(%user, state = "scoring", templates = templates.len());
        let best = select_best(
            templates
                .iter()
                .map(|template| (template, self.matcher.score(&scan, template))),
        );
        drop(scan);

        let Some(best) = best else {
            return Outcome::UserUnknown;
        };

        debug!(%user, state = "deciding", score = best.score.value());
        let outcome = self.policy.decide(&best);

        if let Some(success) = outcome.attempt_result() {
            if let Err(e) = self.guard.record(permit, success).await {
                error!("Failed to persist lockout update for {}: {}", user, e);
                return Outcome::Unavailable {
                    reason: UnavailableReason::Guard,
                };
            }
        }

        outcome
    }

    /// Load templates, retrying a transient failure exactly once
    async fn load_with_retry(&self, user: &UserId) -> Result<Vec<Template>> {
        match self.load_once(user).await {
            Err(e) if e.is_transient() => {
                warn!("Transient store failure for {}, retrying: {}", user, e);
                self.load_once(user).await
            }
            result => result,
        }
    }

    async fn load_once(&self, user: &UserId) -> Result<Vec<Template>> {
        tokio::time::timeout(self.store_timeout, self.store.load(user))
            .await
            .map_err(|_| AuthError::Timeout(self.store_timeout.as_millis() as u64))?
    }
}

fn load_failure(user: &UserId, e: AuthError) -> Outcome {
    match e {
        AuthError::UserUnknown(_) => {
            debug!("No templates enrolled for {}", user);
            Outcome::UserUnknown
        }
        AuthError::Timeout(ms) => {
            error!("Template load for {} timed out after {} ms", user, ms);
            Outcome::Unavailable {
                reason: UnavailableReason::Timeout,
            }
        }
        e => {
            error!("Template store unavailable for {}: {}", user, e);
            Outcome::Unavailable {
                reason: UnavailableReason::Store,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::lockout::LockoutPolicy;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use fingwit_core::{FeatureVector, Finger, Score, FEATURE_DIM};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn alice() -> UserId {
        UserId::new("alice").unwrap()
    }

    fn unit(index: usize) -> Vec<f32> {
        let mut v = vec![0.0; FEATURE_DIM];
        v[index] = 1.0;
        v
    }

    /// Vector whose cosine similarity with `unit(0)` is exactly `score`
    fn scan_scoring(score: f32) -> Scan {
        let mut v = vec![0.0; FEATURE_DIM];
        v[0] = score;
        v[1] = (1.0 - score * score).sqrt();
        Scan::new(FeatureVector::new(v).unwrap(), Utc::now())
    }

    fn enrolled_template() -> Template {
        Template::new(
            alice(),
            Finger::RightIndexFinger,
            FeatureVector::new(unit(0)).unwrap(),
            Utc::now(),
        )
    }

    /// Store double that counts calls and can stall or fail
    struct ScriptedStore {
        calls: AtomicUsize,
        transient_failures: usize,
        delay: Option<Duration>,
        templates: Vec<Template>,
    }

    impl ScriptedStore {
        fn with(templates: Vec<Template>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                transient_failures: 0,
                delay: None,
                templates,
            }
        }
    }

    #[async_trait]
    impl TemplateStore for ScriptedStore {
        async fn load(&self, user: &UserId) -> Result<Vec<Template>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if call < self.transient_failures {
                return Err(AuthError::StoreContended("busy".to_string()));
            }
            if self.templates.is_empty() {
                return Err(AuthError::UserUnknown(user.to_string()));
            }
            Ok(self.templates.clone())
        }
    }

    fn engine_with(store: Arc<ScriptedStore>) -> (TempDir, DecisionEngine) {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
        let guard = SessionGuard::new(
            temp_dir.path().join("lockout"),
            LockoutPolicy::default(),
            clock,
            Duration::from_millis(500),
        );
        let engine = DecisionEngine::with_parts(
            store,
            Arc::new(guard),
            CosineMatcher,
            MatchPolicy::default(),
            Duration::from_millis(100),
        );
        (temp_dir, engine)
    }

    #[tokio::test]
    async fn test_match_and_no_match() {
        let store = Arc::new(ScriptedStore::with(vec![enrolled_template()]));
        let (_dir, engine) = engine_with(store);

        let matched = engine.authenticate(&alice(), "sudo", scan_scoring(0.95)).await;
        assert!(matches!(matched, Outcome::Matched { .. }));

        let rejected = engine.authenticate(&alice(), "sudo", scan_scoring(0.3)).await;
        match rejected {
            Outcome::NoMatch { best } => assert!((best.value() - 0.3).abs() < 1e-6),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(engine.guard().state(&alice()).unwrap().failed_attempts(), 1);
    }

    #[tokio::test]
    async fn test_inconclusive_counts_as_failure() {
        let store = Arc::new(ScriptedStore::with(vec![enrolled_template()]));
        let (_dir, engine) = engine_with(store);

        let outcome = engine.authenticate(&alice(), "sudo", scan_scoring(0.78)).await;
        assert!(matches!(outcome, Outcome::Inconclusive { .. }));
        assert_eq!(engine.guard().state(&alice()).unwrap().failed_attempts(), 1);
    }

    #[tokio::test]
    async fn test_no_templates_is_user_unknown() {
        let store = Arc::new(ScriptedStore::with(Vec::new()));
        let (_dir, engine) = engine_with(store);

        let outcome = engine.authenticate(&alice(), "sudo", scan_scoring(0.95)).await;
        assert_eq!(outcome, Outcome::UserUnknown);
        assert_eq!(engine.guard().state(&alice()).unwrap().failed_attempts(), 0);
    }

    #[tokio::test]
    async fn test_locked_out_never_touches_store() {
        let store = Arc::new(ScriptedStore::with(vec![enrolled_template()]));
        let (_dir, engine) = engine_with(store.clone());

        for _ in 0..5 {
            engine.guard().record_for(&alice(), false).await.unwrap();
        }

        let outcome = engine.authenticate(&alice(), "sudo", scan_scoring(0.99)).await;
        assert!(matches!(outcome, Outcome::LockedOut { .. }));
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_retried_once() {
        let mut scripted = ScriptedStore::with(vec![enrolled_template()]);
        scripted.transient_failures = 1;
        let store = Arc::new(scripted);
        let (_dir, engine) = engine_with(store.clone());

        let outcome = engine.authenticate(&alice(), "sudo", scan_scoring(0.95)).await;
        assert!(matches!(outcome, Outcome::Matched { .. }));
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_persistent_contention_is_unavailable() {
        let mut scripted = ScriptedStore::with(vec![enrolled_template()]);
        scripted.transient_failures = 5;
        let store = Arc::new(scripted);
        let (_dir, engine) = engine_with(store.clone());

        let outcome = engine.authenticate(&alice(), "sudo", scan_scoring(0.95)).await;
        assert_eq!(
            outcome,
            Outcome::Unavailable {
                reason: UnavailableReason::Store
            }
        );
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
        assert_eq!(engine.guard().state(&alice()).unwrap().failed_attempts(), 0);
    }

    #[tokio::test]
    async fn test_slow_store_times_out() {
        let mut scripted = ScriptedStore::with(vec![enrolled_template()]);
        scripted.delay = Some(Duration::from_secs(5));
        let (_dir, engine) = engine_with(Arc::new(scripted));

        let outcome = engine.authenticate(&alice(), "sudo", scan_scoring(0.95)).await;
        assert_eq!(
            outcome,
            Outcome::Unavailable {
                reason: UnavailableReason::Timeout
            }
        );
    }

    #[tokio::test]
    async fn test_corrupt_record_is_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = AuthConfig::default();
        config.store_path = temp_dir.path().to_path_buf();
        let engine = DecisionEngine::from_config(&config).unwrap();

        let store = FileTemplateStore::new(config.templates_dir());
        store.enroll(enrolled_template()).unwrap();
        let record = config
            .templates_dir()
            .join(format!("{}.json", alice().storage_key()));
        std::fs::write(&record, b"{\"magic\":\"FINGWIT-TPL\"").unwrap();

        let outcome = engine.authenticate(&alice(), "sudo", scan_scoring(0.95)).await;
        assert_eq!(
            outcome,
            Outcome::Unavailable {
                reason: UnavailableReason::Store
            }
        );
    }

    #[tokio::test]
    async fn test_tie_prefers_recent_template() {
        let older = Template::new(
            alice(),
            Finger::LeftThumb,
            FeatureVector::new(unit(0)).unwrap(),
            Utc.timestamp_opt(1_600_000_000, 0).unwrap(),
        );
        let newer = Template::new(
            alice(),
            Finger::RightThumb,
            FeatureVector::new(unit(0)).unwrap(),
            Utc.timestamp_opt(1_650_000_000, 0).unwrap(),
        );
        let store = Arc::new(ScriptedStore::with(vec![older, newer.clone()]));
        let (_dir, engine) = engine_with(store);

        match engine.authenticate(&alice(), "sudo", scan_scoring(1.0)).await {
            Outcome::Matched { template_id, score } => {
                assert_eq!(template_id, newer.id());
                assert_eq!(score, Score::MAX);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = AuthConfig::default();
        config.match_threshold = 0.0;
        assert!(matches!(
            DecisionEngine::from_config(&config),
            Err(AuthError::ConfigInvalid(_))
        ));
    }
}
