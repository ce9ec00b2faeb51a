//! Template storage
//!
//! One JSON record per user under `<store>/templates/<sha256(user)>.json`.
//! Writers serialize on a sibling `.lock` file and replace the record by
//! rename. Readers take no lock: a single `read` of the record path always
//! observes one complete snapshot.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use fs2::FileExt;
use tracing::{debug, info};

use fingwit_core::{Finger, Template, TemplateRecord, UserId};

use crate::atomic::{ensure_dir, open_lock_file, shred, write_atomic};
use crate::clock::{Clock, SystemClock};
use crate::error::{AuthError, Result};

/// Read access to enrolled templates
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Load every template enrolled for `user`
    ///
    /// Fails with `UserUnknown` when nothing is enrolled and with
    /// `StoreUnavailable` (or the transient `StoreContended`) when the
    /// record cannot be read or fails validation.
    async fn load(&self, user: &UserId) -> Result<Vec<Template>>;
}

/// File-backed template store
#[derive(Debug, Clone)]
pub struct FileTemplateStore {
    /// Directory holding the per-user records
    dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FileTemplateStore {
    /// Create a store rooted at `dir`; nothing is touched until first use
    pub fn new(dir: PathBuf) -> Self {
        Self::with_clock(dir, Arc::new(SystemClock))
    }

    pub fn with_clock(dir: PathBuf, clock: Arc<dyn Clock>) -> Self {
        Self { dir, clock }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read and validate the full record for a user
    pub fn load_record(&self, user: &UserId) -> Result<TemplateRecord> {
        let path = self.record_path(user);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(AuthError::UserUnknown(user.to_string()))
            }
            Err(e) => return Err(AuthError::from_store_io(e)),
        };

        TemplateRecord::from_json(&bytes, user).map_err(|e| {
            AuthError::StoreUnavailable(format!("record for {} rejected: {}", user, e))
        })
    }

    /// Enroll a template, replacing any template for the same finger
    ///
    /// Returns the replaced template, if any.
    pub fn enroll(&self, template: Template) -> Result<Option<Template>> {
        let user = template.owner().clone();
        let finger = template.finger();
        let id = template.id();

        let replaced = self.modify(&user, |record, now| Ok(record.upsert(template, now)?))?;

        info!(
            "Enrolled {} for {} (template {}{})",
            finger,
            user,
            id.short(),
            if replaced.is_some() { ", replaced previous" } else { "" }
        );
        Ok(replaced)
    }

    /// Remove the template for one finger
    pub fn remove_finger(&self, user: &UserId, finger: Finger) -> Result<Option<Template>> {
        let removed = self.modify(user, |record, now| Ok(record.remove_finger(finger, now)?))?;
        if removed.is_some() {
            info!("Removed {} for {}", finger, user);
        }
        Ok(removed)
    }

    /// Delete all templates for a user
    ///
    /// The record is overwritten with zeros before it is unlinked. Returns
    /// false if nothing was enrolled.
    pub fn delete_user(&self, user: &UserId) -> Result<bool> {
        ensure_dir(&self.dir)?;
        let lock = open_lock_file(&self.lock_path(user))?;
        lock.lock_exclusive()?;

        let deleted = shred(&self.record_path(user))?;
        if deleted {
            info!("Deleted all templates for {}", user);
        }
        Ok(deleted)
    }

    /// Fingers enrolled for a user, in enrollment order
    pub fn enrolled_fingers(&self, user: &UserId) -> Result<Vec<Finger>> {
        match self.load_record(user) {
            Ok(record) => Ok(record.fingers()),
            Err(AuthError::UserUnknown(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Apply a change to a user's record under the writer lock
    fn modify<T>(
        &self,
        user: &UserId,
        change: impl FnOnce(&mut TemplateRecord, chrono::DateTime<chrono::Utc>) -> Result<T>,
    ) -> Result<T> {
        ensure_dir(&self.dir)?;
        let lock = open_lock_file(&self.lock_path(user))?;
        lock.lock_exclusive()?;

        let now = self.clock.now();
        let mut record = match self.load_record(user) {
            Ok(record) => record,
            Err(AuthError::UserUnknown(_)) => TemplateRecord::new(user.clone(), now)?,
            Err(e) => return Err(e),
        };

        let result = change(&mut record, now)?;
        write_atomic(&self.record_path(user), &record.to_json()?)?;
        debug!("Wrote record for {} ({} templates)", user, record.len());

        // Lock released when `lock` is dropped
        Ok(result)
    }

    fn record_path(&self, user: &UserId) -> PathBuf {
        self.dir.join(format!("{}.json", user.storage_key()))
    }

    fn lock_path(&self, user: &UserId) -> PathBuf {
        self.dir.join(format!("{}.lock", user.storage_key()))
    }
}

#[async_trait]
impl TemplateStore for FileTemplateStore {
    async fn load(&self, user: &UserId) -> Result<Vec<Template>> {
        let store = self.clone();
        let user = user.clone();

        let record = tokio::task::spawn_blocking(move || store.load_record(&user).map(|r| (user, r)))
            .await
            .map_err(|e| AuthError::StoreUnavailable(format!("load task failed: {}", e)))?;

        let (user, record) = record?;
        if record.is_empty() {
            return Err(AuthError::UserUnknown(user.to_string()));
        }
        Ok(record.into_templates())
    }
}
