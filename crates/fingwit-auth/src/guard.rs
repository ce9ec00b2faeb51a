//! Session guard: per-user serialization and lockout
//!
//! Every attempt for a user runs under two locks, taken in this order:
//!
//! 1. an in-process `tokio::sync::Mutex` keyed by the user's storage key
//! 2. an `fs2` advisory lock on `<store>/lockout/<key>.lock`
//!
//! The first keeps tasks of one process from contending on the file lock;
//! the second serializes attempts across processes (each PAM conversation
//! may live in its own process). Both are owned by the `AttemptPermit`
//! returned from `check_and_record` and released when the permit is
//! consumed by `record` or dropped.

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use std::time::Duration;

use fs2::FileExt;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use fingwit_core::UserId;

use crate::atomic::{ensure_dir, open_lock_file, write_atomic};
use crate::clock::Clock;
use crate::error::{AuthError, Result};
use crate::lockout::{LockoutPolicy, LockoutState};

/// Poll interval while waiting for another process's file lock
const FILE_LOCK_POLL: Duration = Duration::from_millis(10);

/// Result of admission control for one attempt
#[derive(Debug)]
pub enum Admission {
    /// The attempt may proceed; the permit holds the user's locks
    Admitted(AttemptPermit),
    /// The user is locked out
    LockedOut { retry_after: Duration },
}

/// Exclusive right to evaluate and record one attempt for a user
#[derive(Debug)]
pub struct AttemptPermit {
    user: UserId,
    state: LockoutState,
    _file_lock: File,
    _task_lock: OwnedMutexGuard<()>,
}

impl AttemptPermit {
    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Lockout state as seen at admission
    pub fn state(&self) -> &LockoutState {
        &self.state
    }
}

/// Per-user lockout guard backed by the lockout directory
#[derive(Debug)]
pub struct SessionGuard {
    dir: PathBuf,
    policy: LockoutPolicy,
    clock: Arc<dyn Clock>,
    lock_timeout: Duration,
    locks: StdMutex<HashMap<String, Weak<Mutex<()>>>>,
}

impl SessionGuard {
    /// Create a guard; the lockout directory is created on first use
    pub fn new(
        dir: PathBuf,
        policy: LockoutPolicy,
        clock: Arc<dyn Clock>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            dir,
            policy,
            clock,
            lock_timeout,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Admit an attempt or report the lockout
    pub async fn check_and_record(&self, user: &UserId) -> Result<Admission> {
        let (task_lock, file_lock) = self.acquire(user).await?;

        let now = self.clock.now();
        let mut state = self.read_state(user)?;
        if state.expire_if_elapsed(&self.policy, now) {
            debug!("Lockout window elapsed for {}, counter reset", user);
        }

        if let Some(retry_after) = state.lockout_remaining(&self.policy, now) {
            warn!(
                "{} is locked out ({} failures, retry in {}s)",
                user,
                state.failed_attempts(),
                retry_after.as_secs()
            );
            return Ok(Admission::LockedOut { retry_after });
        }

        Ok(Admission::Admitted(AttemptPermit {
            user: user.clone(),
            state,
            _file_lock: file_lock,
            _task_lock: task_lock,
        }))
    }

    /// Record the result of an admitted attempt and release its locks
    pub async fn record(&self, permit: AttemptPermit, success: bool) -> Result<LockoutState> {
        let mut state = permit.state.clone();
        self.apply(&permit.user, &mut state, success)?;
        drop(permit);
        Ok(state)
    }

    /// Record a result without a prior admission
    pub async fn record_for(&self, user: &UserId, success: bool) -> Result<LockoutState> {
        let (_task_lock, _file_lock) = self.acquire(user).await?;
        let mut state = self.read_state(user)?;
        self.apply(user, &mut state, success)?;
        Ok(state)
    }

    /// Current lockout state, read without locking
    pub fn state(&self, user: &UserId) -> Result<LockoutState> {
        let mut state = self.read_state(user)?;
        state.expire_if_elapsed(&self.policy, self.clock.now());
        Ok(state)
    }

    /// Clear a user's lockout (administrative unlock)
    pub async fn reset(&self, user: &UserId) -> Result<()> {
        let (_task_lock, _file_lock) = self.acquire(user).await?;
        let state = LockoutState::default();
        self.write_state(user, &state)?;
        info!("Lockout reset for {}", user);
        Ok(())
    }

    fn apply(&self, user: &UserId, state: &mut LockoutState, success: bool) -> Result<()> {
        if success {
            state.record_success();
        } else {
            state.record_failure(&self.policy, self.clock.now());
        }
        self.write_state(user, state)?;
        debug!(
            "Recorded {} for {} ({} consecutive failures)",
            if success { "success" } else { "failure" },
            user,
            state.failed_attempts()
        );
        Ok(())
    }

    /// Take both per-user locks within the guard timeout
    async fn acquire(&self, user: &UserId) -> Result<(OwnedMutexGuard<()>, File)> {
        let deadline = Instant::now() + self.lock_timeout;
        let key = user.storage_key();

        let mutex = self.task_mutex(&key);
        let task_lock = tokio::time::timeout_at(deadline, mutex.lock_owned())
            .await
            .map_err(|_| self.timed_out(user))?;

        ensure_dir(&self.dir).map_err(|e| self.unavailable(user, e))?;
        let file = open_lock_file(&self.lock_path(&key)).map_err(|e| self.unavailable(user, e))?;

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if is_contended(&e) => {
                    if Instant::now() >= deadline {
                        return Err(self.timed_out(user));
                    }
                    tokio::time::sleep(FILE_LOCK_POLL).await;
                }
                Err(e) => return Err(self.unavailable(user, e)),
            }
        }

        Ok((task_lock, file))
    }

    /// Shared mutex for a key, pruning entries no attempt holds anymore
    fn task_mutex(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = locks.get(key).and_then(Weak::upgrade) {
            return existing;
        }

        locks.retain(|_, weak| weak.strong_count() > 0);
        let mutex = Arc::new(Mutex::new(()));
        locks.insert(key.to_string(), Arc::downgrade(&mutex));
        mutex
    }

    fn read_state(&self, user: &UserId) -> Result<LockoutState> {
        let path = self.state_path(&user.storage_key());
        match std::fs::read(&path) {
            Ok(bytes) => LockoutState::from_json(&bytes).map_err(|e| {
                AuthError::GuardUnavailable(format!("lockout state for {} unreadable: {}", user, e))
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(LockoutState::default()),
            Err(e) => Err(self.unavailable(user, e)),
        }
    }

    fn write_state(&self, user: &UserId, state: &LockoutState) -> Result<()> {
        ensure_dir(&self.dir).map_err(|e| self.unavailable(user, e))?;
        let path = self.state_path(&user.storage_key());
        write_atomic(&path, &state.to_json()?).map_err(|e| self.unavailable(user, e))
    }

    fn state_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", key))
    }

    fn timed_out(&self, user: &UserId) -> AuthError {
        AuthError::GuardUnavailable(format!(
            "timed out after {} ms waiting for lock on {}",
            self.lock_timeout.as_millis(),
            user
        ))
    }

    fn unavailable(&self, user: &UserId, e: io::Error) -> AuthError {
        AuthError::GuardUnavailable(format!("lockout store for {}: {}", user, e))
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[cfg(test)]
    fn dir(&self) -> &std::path::Path {
        &self.dir
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn alice() -> UserId {
        UserId::new("alice").unwrap()
    }

    fn test_guard(clock: Arc<ManualClock>) -> (TempDir, SessionGuard) {
        let temp_dir = TempDir::new().unwrap();
        let guard = SessionGuard::new(
            temp_dir.path().join("lockout"),
            LockoutPolicy::default(),
            clock,
            Duration::from_millis(200),
        );
        (temp_dir, guard)
    }

    fn start() -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    async fn fail_once(guard: &SessionGuard, user: &UserId) -> LockoutState {
        match guard.check_and_record(user).await.unwrap() {
            Admission::Admitted(permit) => guard.record(permit, false).await.unwrap(),
            Admission::LockedOut { .. } => panic!("unexpected lockout"),
        }
    }

    #[tokio::test]
    async fn test_success_resets_counter() {
        let clock = Arc::new(ManualClock::new(start()));
        let (_dir, guard) = test_guard(clock);

        fail_once(&guard, &alice()).await;
        fail_once(&guard, &alice()).await;
        assert_eq!(guard.state(&alice()).unwrap().failed_attempts(), 2);

        let permit = match guard.check_and_record(&alice()).await.unwrap() {
            Admission::Admitted(permit) => permit,
            Admission::LockedOut { .. } => panic!("unexpected lockout"),
        };
        let state = guard.record(permit, true).await.unwrap();
        assert_eq!(state.failed_attempts(), 0);
        assert_eq!(guard.state(&alice()).unwrap().failed_attempts(), 0);
    }

    #[tokio::test]
    async fn test_lockout_after_max_attempts_and_expiry() {
        let clock = Arc::new(ManualClock::new(start()));
        let (_dir, guard) = test_guard(clock.clone());

        for _ in 0..5 {
            fail_once(&guard, &alice()).await;
        }

        match guard.check_and_record(&alice()).await.unwrap() {
            Admission::LockedOut { retry_after } => assert_eq!(retry_after.as_secs(), 300),
            Admission::Admitted(_) => panic!("expected lockout"),
        }

        clock.advance(chrono::Duration::seconds(300));
        match guard.check_and_record(&alice()).await.unwrap() {
            Admission::Admitted(permit) => assert_eq!(permit.state().failed_attempts(), 0),
            Admission::LockedOut { .. } => panic!("lockout should have lifted"),
        }
    }

    #[tokio::test]
    async fn test_state_persists_across_guards() {
        let clock = Arc::new(ManualClock::new(start()));
        let (dir, guard) = test_guard(clock.clone());
        fail_once(&guard, &alice()).await;

        let other = SessionGuard::new(
            dir.path().join("lockout"),
            LockoutPolicy::default(),
            clock,
            Duration::from_millis(200),
        );
        assert_eq!(other.state(&alice()).unwrap().failed_attempts(), 1);
    }

    #[tokio::test]
    async fn test_held_permit_times_out_second_attempt() {
        let clock = Arc::new(ManualClock::new(start()));
        let (_dir, guard) = test_guard(clock);

        let first = guard.check_and_record(&alice()).await.unwrap();
        let second = guard.check_and_record(&alice()).await;
        assert!(matches!(second, Err(AuthError::GuardUnavailable(_))));

        drop(first);
        assert!(guard.check_and_record(&alice()).await.is_ok());
    }

    #[tokio::test]
    async fn test_file_lock_blocks_other_guard() {
        let clock = Arc::new(ManualClock::new(start()));
        let (dir, guard) = test_guard(clock.clone());
        let other = SessionGuard::new(
            dir.path().join("lockout"),
            LockoutPolicy::default(),
            clock,
            Duration::from_millis(100),
        );

        let _held = guard.check_and_record(&alice()).await.unwrap();
        assert!(matches!(
            other.check_and_record(&alice()).await,
            Err(AuthError::GuardUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_users_do_not_share_locks() {
        let clock = Arc::new(ManualClock::new(start()));
        let (_dir, guard) = test_guard(clock);
        let bob = UserId::new("bob").unwrap();

        let _alice_permit = guard.check_and_record(&alice()).await.unwrap();
        assert!(matches!(
            guard.check_and_record(&bob).await.unwrap(),
            Admission::Admitted(_)
        ));
    }

    #[tokio::test]
    async fn test_record_for_and_reset() {
        let clock = Arc::new(ManualClock::new(start()));
        let (_dir, guard) = test_guard(clock);

        for _ in 0..5 {
            guard.record_for(&alice(), false).await.unwrap();
        }
        assert!(matches!(
            guard.check_and_record(&alice()).await.unwrap(),
            Admission::LockedOut { .. }
        ));

        guard.reset(&alice()).await.unwrap();
        assert_eq!(guard.state(&alice()).unwrap(), LockoutState::default());
    }

    #[tokio::test]
    async fn test_corrupt_state_fails_closed() {
        let clock = Arc::new(ManualClock::new(start()));
        let (_dir, guard) = test_guard(clock);
        fail_once(&guard, &alice()).await;

        let path = guard.dir().join(format!("{}.json", alice().storage_key()));
        std::fs::write(&path, b"not json").unwrap();

        assert!(matches!(
            guard.check_and_record(&alice()).await,
            Err(AuthError::GuardUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_released_locks_are_pruned() {
        let clock = Arc::new(ManualClock::new(start()));
        let (_dir, guard) = test_guard(clock);

        for name in ["u1", "u2", "u3"] {
            let user = UserId::new(name).unwrap();
            guard.record_for(&user, false).await.unwrap();
        }
        // Each insert prunes entries whose permits are gone
        assert_eq!(guard.tracked_keys(), 1);
    }
}
