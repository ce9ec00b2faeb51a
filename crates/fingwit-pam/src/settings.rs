//! Settings layering: defaults, then the TOML file, then module arguments
//!
//! Example `/etc/security/fingwit.toml`:
//!
//! ```toml
//! [auth]
//! match_threshold = 0.85
//! store_path = "/var/lib/fingwit"
//!
//! [auth.lockout]
//! max_attempts = 5
//! lockout_window_secs = 300
//!
//! [capture]
//! scan_path = "/run/fingwit/scan.json"
//! timeout_secs = 30
//! max_tries = 3
//!
//! [session]
//! allow_ssh = false
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use fingwit_auth::AuthConfig;

use crate::args::ModuleArgs;
use crate::error::{Result, SettingsError};

/// Settings file read when no `config=` argument is given
pub const DEFAULT_CONFIG_PATH: &str = "/etc/security/fingwit.toml";

/// Capture hand-off file written by the sensor helper
pub const DEFAULT_SCAN_PATH: &str = "/run/fingwit/scan.json";

/// Scan capture settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Path of the capture hand-off file
    pub scan_path: PathBuf,
    /// Seconds to wait for each scan
    pub timeout_secs: u64,
    /// Scans per PAM call
    pub max_tries: u32,
    /// Oldest scan accepted, in seconds
    pub max_age_secs: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            scan_path: PathBuf::from(DEFAULT_SCAN_PATH),
            timeout_secs: 30,
            max_tries: 3,
            max_age_secs: 10,
        }
    }
}

/// Session-context settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Allow fingerprint auth over SSH
    pub allow_ssh: bool,
    /// Root of user home directories, for the encrypted-home check
    pub home_root: Option<PathBuf>,
    /// Verbose conversation messages and debug logging
    pub debug: bool,
}

/// Fully resolved module settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub auth: AuthConfig,
    pub capture: CaptureConfig,
    pub session: SessionConfig,
}

impl Settings {
    /// Resolve settings from module arguments, reading the config file if any
    pub fn resolve(args: &ModuleArgs) -> Result<Self> {
        let mut settings = match &args.config {
            Some(path) => Self::load(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::load(default_path)?
                } else {
                    Self::default()
                }
            }
        };

        settings.apply(args);
        settings.validate()?;
        Ok(settings)
    }

    /// Load a settings file
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|source| SettingsError::ConfigUnreadable {
                path: path.display().to_string(),
                source,
            })?;
        let settings: Self = toml::from_str(&content)?;
        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Overlay module arguments
    pub fn apply(&mut self, args: &ModuleArgs) {
        if let Some(threshold) = args.threshold {
            self.auth.match_threshold = threshold;
        }
        if let Some(margin) = args.margin {
            self.auth.inconclusive_margin = margin;
        }
        if let Some(max_attempts) = args.max_attempts {
            self.auth.lockout.max_attempts = max_attempts;
        }
        if let Some(window) = args.lockout_window_secs {
            self.auth.lockout.lockout_window_secs = window;
        }
        if let Some(store) = &args.store {
            self.auth.store_path = store.clone();
        }
        if let Some(scan) = &args.scan {
            self.capture.scan_path = scan.clone();
        }
        if let Some(timeout) = args.timeout_secs {
            self.capture.timeout_secs = timeout;
        }
        if let Some(max_tries) = args.max_tries {
            self.capture.max_tries = max_tries;
        }
        self.session.debug |= args.debug;
        self.session.allow_ssh |= args.allow_ssh;
    }

    pub fn validate(&self) -> Result<()> {
        self.auth.validate()?;
        if self.capture.max_tries == 0 {
            return Err(SettingsError::Invalid("max-tries must be at least 1".to_string()));
        }
        if self.capture.timeout_secs == 0 {
            return Err(SettingsError::Invalid("timeout must be at least 1 second".to_string()));
        }
        if self.capture.max_age_secs == 0 {
            return Err(SettingsError::Invalid(
                "scan max age must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.capture.timeout_secs)
    }

    pub fn scan_max_age(&self) -> Duration {
        Duration::from_secs(self.capture.max_age_secs)
    }

    /// Wall-clock bound for one whole PAM call
    pub fn overall_timeout(&self) -> Duration {
        self.scan_timeout()
            .saturating_add(self.auth.store_timeout())
            .saturating_add(self.auth.guard_timeout())
            .saturating_mul(self.capture.max_tries)
    }

    pub fn home_root(&self) -> &Path {
        self.session
            .home_root
            .as_deref()
            .unwrap_or_else(|| Path::new("/home"))
    }
}
