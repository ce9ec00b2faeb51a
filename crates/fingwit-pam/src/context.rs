//! Session context probing
//!
//! Fingerprint auth is skipped (and the stack falls through to the next
//! method) in two situations:
//!
//! - remote sessions, where nobody is at the reader
//! - initial logins for users whose home is eCryptfs-wrapped, where only a
//!   password can unwrap the home directory
//!
//! Probing gathers facts; `skip_reason` decides from them without I/O.

use std::fmt;
use std::io::IsTerminal;
use std::path::Path;

use tracing::debug;

/// Environment variables set by sshd for remote sessions
pub const SSH_ENV_VARS: [&str; 4] = ["SSH_CLIENT", "SSH_CONNECTION", "SSH_TTY", "SSH_ORIGINAL_COMMAND"];

/// PAM services that perform an initial login
pub const LOGIN_SERVICES: [&str; 4] = ["lightdm", "gdm", "sddm", "login"];

/// Process names of display managers and login programs
///
/// `gdm-session-wor` is gdm-session-worker truncated to the 15-byte comm.
pub const LOGIN_PARENTS: [&str; 5] = ["lightdm", "gdm", "gdm-session-wor", "sddm", "login"];

/// Why biometric auth is skipped for this session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    SshSession,
    EncryptedHomeLogin,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::SshSession => f.write_str("skipping SSH session"),
            SkipReason::EncryptedHomeLogin => {
                f.write_str("skipping encrypted home for login session")
            }
        }
    }
}

/// Facts about the calling session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub service: String,
    /// Any of the sshd environment variables is set
    pub ssh_env: bool,
    /// `comm` of the parent process, if readable
    pub parent_process: Option<String>,
    pub stdin_is_tty: bool,
    /// The user has an eCryptfs home
    pub encrypted_home: bool,
}

impl SessionContext {
    /// Probe the current process for `user` authenticating via `service`
    pub fn detect(user: &str, service: &str, home_root: &Path) -> Self {
        let context = Self {
            service: service.to_string(),
            ssh_env: SSH_ENV_VARS
                .iter()
                .any(|var| std::env::var_os(var).is_some_and(|v| !v.is_empty())),
            parent_process: parent_process_name(),
            stdin_is_tty: std::io::stdin().is_terminal(),
            encrypted_home: has_encrypted_home(user, home_root),
        };
        debug!("Session context: {:?}", context);
        context
    }

    pub fn is_ssh_session(&self) -> bool {
        self.ssh_env || self.parent_process.as_deref() == Some("sshd") || !self.stdin_is_tty
    }

    pub fn is_login_session(&self) -> bool {
        LOGIN_SERVICES.contains(&self.service.as_str())
            || self
                .parent_process
                .as_deref()
                .is_some_and(|parent| LOGIN_PARENTS.contains(&parent))
    }

    /// Decide whether to skip biometric auth
    pub fn skip_reason(&self, allow_ssh: bool) -> Option<SkipReason> {
        if !allow_ssh && self.is_ssh_session() {
            return Some(SkipReason::SshSession);
        }
        if self.is_login_session() && self.encrypted_home {
            return Some(SkipReason::EncryptedHomeLogin);
        }
        None
    }
}

/// Whether `user` has an eCryptfs-wrapped home under `home_root`
pub fn has_encrypted_home(user: &str, home_root: &Path) -> bool {
    // A name that could climb out of the home root is never a home
    if user.is_empty() || user.contains('/') || user == "." || user == ".." {
        return false;
    }

    [
        home_root.join(".ecryptfs").join(user),
        home_root.join(user).join(".ecryptfs"),
        home_root.join(user).join(".Private"),
    ]
    .iter()
    .any(|path| path.exists())
}

#[cfg(unix)]
fn parent_process_name() -> Option<String> {
    let ppid = std::os::unix::process::parent_id();
    std::fs::read_to_string(format!("/proc/{}/comm", ppid))
        .ok()
        .map(|name| name.trim().to_string())
}

#[cfg(not(unix))]
fn parent_process_name() -> Option<String> {
    None
}
