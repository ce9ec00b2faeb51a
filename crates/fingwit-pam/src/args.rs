//! PAM module argument parsing
//!
//! Arguments come from the PAM stack line, e.g.
//! `auth sufficient pam_fingwit.so max-tries=3 timeout=30 debug`.
//! Each is either `key=value` or a bare flag. Unknown keys are logged and
//! ignored so a newer stack line keeps working with an older module.

use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

use crate::error::{Result, SettingsError};

/// Parsed module arguments; `None` means "not given on the stack line"
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleArgs {
    pub config: Option<PathBuf>,
    pub threshold: Option<f64>,
    pub margin: Option<f64>,
    pub max_attempts: Option<u32>,
    pub lockout_window_secs: Option<u64>,
    pub store: Option<PathBuf>,
    pub scan: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub max_tries: Option<u32>,
    pub debug: bool,
    pub allow_ssh: bool,
}

impl ModuleArgs {
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        let mut parsed = Self::default();

        for arg in args {
            let arg = arg.as_ref().trim();
            if arg.is_empty() {
                continue;
            }

            let (key, value) = match arg.split_once('=') {
                Some((key, value)) => (key, Some(value)),
                None => (arg, None),
            };

            match key {
                "debug" => parsed.debug = true,
                "allow-ssh" => parsed.allow_ssh = true,
                "config" => parsed.config = Some(path_value(key, value)?),
                "store" => parsed.store = Some(path_value(key, value)?),
                "scan" => parsed.scan = Some(path_value(key, value)?),
                "threshold" => parsed.threshold = Some(number(key, value)?),
                "margin" => parsed.margin = Some(number(key, value)?),
                "max-attempts" => parsed.max_attempts = Some(number(key, value)?),
                "lockout-window" => parsed.lockout_window_secs = Some(number(key, value)?),
                "timeout" => parsed.timeout_secs = Some(number(key, value)?),
                "max-tries" => parsed.max_tries = Some(number(key, value)?),
                _ => warn!("Ignoring unknown module argument: {}", arg),
            }
        }

        Ok(parsed)
    }
}

fn required<'a>(key: &str, value: Option<&'a str>) -> Result<&'a str> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(SettingsError::MissingValue(key.to_string())),
    }
}

fn path_value(key: &str, value: Option<&str>) -> Result<PathBuf> {
    required(key, value).map(PathBuf::from)
}

fn number<T>(key: &str, value: Option<&str>) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let value = required(key, value)?;
    value.parse().map_err(|e: T::Err| SettingsError::InvalidArgument {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}
