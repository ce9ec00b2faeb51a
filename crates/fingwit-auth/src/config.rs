//! Authentication configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use fingwit_core::{MatchPolicy, DEFAULT_INCONCLUSIVE_MARGIN, DEFAULT_MATCH_THRESHOLD};

use crate::error::{AuthError, Result};
use crate::lockout::LockoutPolicy;

/// Default store root
pub const DEFAULT_STORE_PATH: &str = "/var/lib/fingwit";

/// Core configuration for the decision engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Minimum score accepted as a match
    pub match_threshold: f64,

    /// Width of the inconclusive band below the threshold
    pub inconclusive_margin: f64,

    /// Lockout policy applied per user
    pub lockout: LockoutPolicy,

    /// Root of the template and lockout store
    pub store_path: PathBuf,

    /// Bound on a single template load (milliseconds)
    pub store_timeout_ms: u64,

    /// Bound on acquiring the per-user guard locks (milliseconds)
    pub guard_timeout_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            inconclusive_margin: DEFAULT_INCONCLUSIVE_MARGIN,
            lockout: LockoutPolicy::default(),
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            store_timeout_ms: 2_000,
            guard_timeout_ms: 5_000,
        }
    }
}

impl AuthConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AuthError::ConfigInvalid(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Check every field, reporting the first problem found
    pub fn validate(&self) -> Result<()> {
        self.match_policy()?;
        self.lockout.validate()?;
        if self.store_path.as_os_str().is_empty() {
            return Err(AuthError::ConfigInvalid("store path is empty".to_string()));
        }
        if self.store_timeout_ms == 0 {
            return Err(AuthError::ConfigInvalid(
                "store timeout must be positive".to_string(),
            ));
        }
        if self.guard_timeout_ms == 0 {
            return Err(AuthError::ConfigInvalid(
                "guard timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Validated match policy
    pub fn match_policy(&self) -> Result<MatchPolicy> {
        MatchPolicy::new(self.match_threshold, self.inconclusive_margin)
            .map_err(|e| AuthError::ConfigInvalid(e.to_string()))
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.store_path.join("templates")
    }

    pub fn lockout_dir(&self) -> PathBuf {
        self.store_path.join("lockout")
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn guard_timeout(&self) -> Duration {
        Duration::from_millis(self.guard_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_is_valid() {
        let config = AuthConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.templates_dir(), PathBuf::from("/var/lib/fingwit/templates"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("fingwit.toml");
        std::fs::write(
            &path,
            "match_threshold = 0.9\n\n[lockout]\nmax_attempts = 3\n",
        )
        .unwrap();

        let config = AuthConfig::load(&path).unwrap();
        assert_eq!(config.match_threshold, 0.9);
        assert_eq!(config.lockout.max_attempts, 3);
        assert_eq!(config.lockout.lockout_window_secs, 300);
        assert_eq!(config.inconclusive_margin, DEFAULT_INCONCLUSIVE_MARGIN);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = AuthConfig::default();
        config.match_threshold = 1.5;
        assert!(matches!(config.validate(), Err(AuthError::ConfigInvalid(_))));

        let mut config = AuthConfig::default();
        config.store_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(AuthError::ConfigInvalid(_))));

        let mut config = AuthConfig::default();
        config.lockout.lockout_window_secs = 0;
        assert!(matches!(config.validate(), Err(AuthError::ConfigInvalid(_))));
    }

    #[test]
    fn test_unreadable_or_malformed_file() {
        let temp_dir = TempDir::new().unwrap();
        assert!(matches!(
            AuthConfig::load(&temp_dir.path().join("missing.toml")),
            Err(AuthError::ConfigInvalid(_))
        ));

        let path = temp_dir.path().join("bad.toml");
        std::fs::write(&path, "match_threshold = \"high\"").unwrap();
        assert!(matches!(
            AuthConfig::load(&path),
            Err(AuthError::ConfigInvalid(_))
        ));
    }
}
