//! Live scan acquisition
//!
//! The sensor helper drops one scan envelope at the hand-off path, writing
//! it elsewhere and renaming it into place. The module waits for it, claims
//! it by renaming it to a name private to this waiter, then reads and
//! deletes the claimed file and checks that the scan is fresh. Only one of
//! several concurrent waiters can win the rename.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use fingwit_auth::Clock;
use fingwit_core::Scan;

use crate::error::CaptureError;

/// Polling interval while waiting for the hand-off file
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Tolerated clock skew between the sensor helper and this process
const MAX_CLOCK_SKEW_SECS: i64 = 2;

/// Distinguishes claims made by different waiters in one process
static CLAIMS: AtomicU64 = AtomicU64::new(0);

/// Source of live scans
#[async_trait]
pub trait ScanSource: Send + Sync {
    /// Wait for and return the next scan
    async fn capture(&self) -> Result<Scan, CaptureError>;
}

/// Scans handed off through a file
#[derive(Debug)]
pub struct FileScanSource {
    path: PathBuf,
    timeout: Duration,
    max_age: Duration,
    clock: Arc<dyn Clock>,
}

impl FileScanSource {
    pub fn new(path: PathBuf, timeout: Duration, max_age: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            path,
            timeout,
            max_age,
            clock,
        }
    }

    /// Claim, read and delete the hand-off file, if present
    fn take(&self) -> Result<Option<Scan>, CaptureError> {
        let claimed = self.path.with_extension(format!(
            "claimed.{}.{}",
            std::process::id(),
            CLAIMS.fetch_add(1, Ordering::Relaxed)
        ));
        match std::fs::rename(&self.path, &claimed) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CaptureError::Io(e)),
        }

        let read = std::fs::read(&claimed).map(Zeroizing::new);
        if let Err(e) = std::fs::remove_file(&claimed) {
            warn!("Could not remove consumed scan {}: {}", claimed.display(), e);
        }

        let scan = Scan::from_json(&read?)?;
        self.check_freshness(&scan)?;
        Ok(Some(scan))
    }

    fn check_freshness(&self, scan: &Scan) -> Result<(), CaptureError> {
        let age = scan.age(self.clock.now());
        if age < -chrono::Duration::seconds(MAX_CLOCK_SKEW_SECS) {
            return Err(CaptureError::FutureDated {
                ahead_secs: -age.num_seconds(),
            });
        }
        let max_age = chrono::Duration::from_std(self.max_age).unwrap_or(chrono::Duration::MAX);
        if age > max_age {
            return Err(CaptureError::Stale {
                age_secs: age.num_seconds(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ScanSource for FileScanSource {
    async fn capture(&self) -> Result<Scan, CaptureError> {
        let deadline = Instant::now().checked_add(self.timeout);
        debug!("Waiting for scan at {}", self.path.display());

        loop {
            if let Some(scan) = self.take()? {
                debug!("Scan received (captured {})", scan.captured_at());
                return Ok(scan);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(CaptureError::Timeout(self.timeout));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use fingwit_auth::ManualClock;
    use fingwit_core::{FeatureVector, UnavailableReason, FEATURE_DIM};
    use tempfile::TempDir;

    fn now() -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn write_scan(path: &std::path::Path, captured_at: chrono::DateTime<Utc>) {
        let scan = Scan::new(FeatureVector::new(vec![0.5; FEATURE_DIM]).unwrap(), captured_at);
        let temp = path.with_extension("tmp");
        std::fs::write(&temp, scan.to_json().unwrap()).unwrap();
        std::fs::rename(&temp, path).unwrap();
    }

    fn source(dir: &TempDir, timeout_ms: u64) -> FileScanSource {
        FileScanSource::new(
            dir.path().join("scan.json"),
            Duration::from_millis(timeout_ms),
            Duration::from_secs(10),
            Arc::new(ManualClock::new(now())),
        )
    }

    #[tokio::test]
    async fn test_capture_consumes_file() {
        let dir = TempDir::new().unwrap();
        let source = source(&dir, 500);
        write_scan(&dir.path().join("scan.json"), now() - chrono::Duration::seconds(1));

        let scan = source.capture().await.unwrap();
        assert_eq!(scan.features().as_slice().len(), FEATURE_DIM);
        assert!(!dir.path().join("scan.json").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_waiters_share_one_scan() {
        let dir = Arc::new(TempDir::new().unwrap());
        let path = dir.path().join("scan.json");

        let mut waiters = Vec::new();
        for _ in 0..4 {
            let source = source(&dir, 600);
            waiters.push(tokio::spawn(async move { source.capture().await }));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        write_scan(&path, now());

        let mut received = 0;
        for waiter in waiters {
            match waiter.await.unwrap() {
                Ok(_) => received += 1,
                Err(e) => assert!(matches!(e, CaptureError::Timeout(_))),
            }
        }
        assert_eq!(received, 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_capture_waits_for_file() {
        let dir = TempDir::new().unwrap();
        let source = source(&dir, 2_000);
        let path = dir.path().join("scan.json");

        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            write_scan(&path, now());
        });

        assert!(source.capture().await.is_ok());
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_capture_times_out() {
        let dir = TempDir::new().unwrap();
        let err = source(&dir, 100).capture().await.unwrap_err();
        assert!(matches!(err, CaptureError::Timeout(_)));
        assert_eq!(
            err.outcome(),
            fingwit_core::Outcome::Unavailable {
                reason: UnavailableReason::Timeout
            }
        );
    }

    #[tokio::test]
    async fn test_stale_and_future_scans_rejected() {
        let dir = TempDir::new().unwrap();
        let source = source(&dir, 500);
        let path = dir.path().join("scan.json");

        write_scan(&path, now() - chrono::Duration::seconds(60));
        assert!(matches!(
            source.capture().await,
            Err(CaptureError::Stale { age_secs: 60 })
        ));
        assert!(!path.exists());

        write_scan(&path, now() + chrono::Duration::seconds(30));
        assert!(matches!(
            source.capture().await,
            Err(CaptureError::FutureDated { ahead_secs: 30 })
        ));
    }

    #[tokio::test]
    async fn test_malformed_scan_rejected() {
        let dir = TempDir::new().unwrap();
        let source = source(&dir, 500);
        std::fs::write(dir.path().join("scan.json"), b"{\"magic\":\"nope\"}").unwrap();

        let err = source.capture().await.unwrap_err();
        assert!(matches!(err, CaptureError::Malformed(_)));
        assert_eq!(
            err.outcome(),
            fingwit_core::Outcome::Unavailable {
                reason: UnavailableReason::Scan
            }
        );
    }
}
