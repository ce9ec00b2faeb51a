//! # pam_fingwit
//!
//! PAM service module for fingerprint authentication.
//!
//! Stack line example:
//!
//! ```text
//! auth  sufficient  pam_fingwit.so  max-tries=3 timeout=30
//! auth  include     common-auth
//! ```
//!
//! One `pam_sm_authenticate` call resolves settings, applies the session
//! skip rules, then runs up to `max-tries` scans through the decision
//! engine. The engine is linked in-process; nothing is forked.
//!
//! The `pam_sm_*` symbols are exported only with the `pam-module` feature,
//! which links against libpam. Diagnostics and audit entries go to the PAM
//! syslog, never to the caller's terminal.

pub mod args;
pub mod capture;
pub mod context;
pub mod error;
pub mod logging;
pub mod settings;

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use fingwit_auth::{AuditEntry, AuditLog, Clock, DecisionEngine, SystemClock};
use fingwit_core::{classify, ExternalCode, Matcher, Outcome, UnavailableReason, UserId};

pub use args::ModuleArgs;
pub use capture::{FileScanSource, ScanSource};
pub use context::{SessionContext, SkipReason};
pub use error::{CaptureError, Result, SettingsError};
pub use settings::Settings;

pub const PROMPT_PLACE_FINGER: &str = "Place your finger on the fingerprint reader";
pub const MSG_TRY_AGAIN: &str = "Try again...";
pub const MSG_SUCCESS: &str = "Fingerprint verification successful";
pub const MSG_FAILURE: &str = "Fingerprint verification failed";

/// User-facing message channel (the PAM conversation)
pub trait Prompter {
    fn info(&self, msg: &str);
    fn error(&self, msg: &str);
}

/// Prompter for use outside a PAM conversation
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrPrompter;

impl Prompter for StderrPrompter {
    fn info(&self, msg: &str) {
        eprintln!("pam_fingwit: {}", msg);
    }

    fn error(&self, msg: &str) {
        eprintln!("pam_fingwit: {}", msg);
    }
}

/// Authenticate `user` for `service`, messaging on stderr
pub fn authenticate(user: &str, service: &str, module_args: &[String]) -> Result<ExternalCode> {
    authenticate_with_prompter(user, service, module_args, &StderrPrompter)
}

/// Authenticate `user` for `service`
///
/// Errors are configuration problems only; every runtime failure is
/// already folded into the returned code.
pub fn authenticate_with_prompter(
    user: &str,
    service: &str,
    module_args: &[String],
    prompter: &dyn Prompter,
) -> Result<ExternalCode> {
    logging::init(module_args.iter().any(|arg| arg.trim() == "debug"));

    let args = ModuleArgs::parse(module_args)?;
    let settings = Settings::resolve(&args)?;

    let user_id = match UserId::new(user) {
        Ok(user_id) => user_id,
        Err(e) => {
            warn!("Rejecting user name for {}: {}", service, e);
            return Ok(ExternalCode::UserUnknown);
        }
    };

    let context = SessionContext::detect(user, service, settings.home_root());
    if let Some(reason) = context.skip_reason(settings.session.allow_ssh) {
        warn!("{}: {} for {}", service, reason, user_id);
        if settings.session.debug {
            prompter.info(&format!("fingwit: {}", reason));
        }
        let outcome = Outcome::Unavailable {
            reason: UnavailableReason::Skipped,
        };
        audit(&user_id, service, &outcome);
        return Ok(classify(&outcome));
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = DecisionEngine::from_config_with_clock(&settings.auth, Arc::clone(&clock))?;
    let source = FileScanSource::new(
        settings.capture.scan_path.clone(),
        settings.scan_timeout(),
        settings.scan_max_age(),
        clock,
    );

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            let outcome = Outcome::Unavailable {
                reason: UnavailableReason::Internal,
            };
            audit(&user_id, service, &outcome);
            return Ok(classify(&outcome));
        }
    };

    let overall = settings.overall_timeout();
    let outcome = runtime.block_on(async {
        let attempts = run_attempts(&settings, &engine, &source, &user_id, service, prompter);
        match tokio::time::timeout(overall, attempts).await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!("Authentication for {} exceeded {}s", user_id, overall.as_secs());
                let outcome = Outcome::Unavailable {
                    reason: UnavailableReason::Timeout,
                };
                audit(&user_id, service, &outcome);
                outcome
            }
        }
    });

    let code = classify(&outcome);
    debug!("{} via {}: {} -> {}", user_id, service, outcome, code);
    Ok(code)
}

/// Run up to `max_tries` scans, re-prompting after a rejected scan
pub async fn run_attempts<M: Matcher>(
    settings: &Settings,
    engine: &DecisionEngine<M>,
    source: &dyn ScanSource,
    user: &UserId,
    service: &str,
    prompter: &dyn Prompter,
) -> Outcome {
    let max_tries = settings.capture.max_tries.max(1);
    let mut outcome = Outcome::Unavailable {
        reason: UnavailableReason::Internal,
    };

    for attempt in 1..=max_tries {
        if settings.session.debug {
            prompter.info(&format!("fingwit: attempt {}/{}", attempt, max_tries));
        }
        prompter.info(PROMPT_PLACE_FINGER);

        let scan = match source.capture().await {
            Ok(scan) => scan,
            Err(e) => {
                warn!("Scan capture failed for {}: {}", user, e);
                outcome = e.outcome();
                audit(user, service, &outcome);
                break;
            }
        };

        outcome = engine.authenticate(user, service, scan).await;
        if outcome.is_success() {
            prompter.info(MSG_SUCCESS);
            return outcome;
        }
        if !outcome.is_retryable() {
            break;
        }
        if attempt < max_tries {
            info!("Attempt {}/{} rejected for {}, re-scanning", attempt, max_tries, user);
            prompter.error(MSG_TRY_AGAIN);
        }
    }

    if let Outcome::LockedOut { retry_after } = outcome {
        prompter.error(&lockout_message(engine, user, retry_after));
    } else {
        prompter.error(MSG_FAILURE);
    }
    outcome
}

fn lockout_message<M: Matcher>(
    engine: &DecisionEngine<M>,
    user: &UserId,
    retry_after: std::time::Duration,
) -> String {
    let guard = engine.guard();
    let now = guard.clock().now();
    let detail = match guard.state(user) {
        Ok(state) if state.is_locked(guard.policy(), now) => guard.policy().describe(&state, now),
        _ => format!("Locked for {} seconds", retry_after.as_secs().max(1)),
    };
    format!("Too many failed attempts. {}", detail)
}

fn audit(user: &UserId, service: &str, outcome: &Outcome) {
    AuditLog::log(&AuditEntry::from_outcome(Utc::now(), user, service, outcome));
}

#[cfg(feature = "pam-module")]
mod module {
    use pamsm::{
        pam_module, LogLvl, Pam, PamError, PamFlags, PamLibExt, PamMsgStyle, PamServiceModule,
    };
    use tracing::{error, Level};

    use fingwit_core::ExternalCode;

    use crate::{logging, Prompter};

    struct PamPrompter<'a> {
        pamh: &'a Pam,
    }

    impl Prompter for PamPrompter<'_> {
        fn info(&self, msg: &str) {
            let _ = self.pamh.conv(Some(msg), PamMsgStyle::TEXT_INFO);
        }

        fn error(&self, msg: &str) {
            let _ = self.pamh.conv(Some(msg), PamMsgStyle::ERROR_MSG);
        }
    }

    fn pam_error(code: ExternalCode) -> PamError {
        match code {
            ExternalCode::Success => PamError::SUCCESS,
            ExternalCode::AuthErr => PamError::AUTH_ERR,
            ExternalCode::AuthinfoUnavail => PamError::AUTHINFO_UNAVAIL,
            ExternalCode::UserUnknown => PamError::USER_UNKNOWN,
        }
    }

    /// Hand this call's buffered log lines to the PAM syslog
    fn forward_logs(pamh: &Pam) {
        for line in logging::drain() {
            let level = if line.level == Level::ERROR {
                LogLvl::ERR
            } else if line.level == Level::WARN {
                LogLvl::WARNING
            } else if line.level == Level::INFO {
                LogLvl::INFO
            } else {
                LogLvl::DEBUG
            };
            let _ = pamh.syslog(level, &line.to_string());
        }
    }

    struct FingwitModule;
    pam_module!(FingwitModule);

    impl PamServiceModule for FingwitModule {
        fn authenticate(pamh: Pam, _flags: PamFlags, args: Vec<String>) -> PamError {
            let user = match pamh.get_user(None) {
                Ok(Some(user)) => match user.to_str() {
                    Ok(user) if !user.is_empty() => user.to_string(),
                    _ => return PamError::USER_UNKNOWN,
                },
                Ok(None) => return PamError::USER_UNKNOWN,
                Err(e) => return e,
            };
            let service = match pamh.get_service() {
                Ok(Some(service)) => service.to_string_lossy().into_owned(),
                _ => "unknown".to_string(),
            };

            let prompter = PamPrompter { pamh: &pamh };
            let result = match crate::authenticate_with_prompter(&user, &service, &args, &prompter)
            {
                Ok(code) => pam_error(code),
                Err(e) => {
                    error!("pam_fingwit misconfigured: {}", e);
                    PamError::SERVICE_ERR
                }
            };
            forward_logs(&pamh);
            result
        }

        fn setcred(_pamh: Pam, _flags: PamFlags, _args: Vec<String>) -> PamError {
            PamError::SUCCESS
        }

        fn acct_mgmt(_pamh: Pam, _flags: PamFlags, _args: Vec<String>) -> PamError {
            PamError::SUCCESS
        }

        fn open_session(_pamh: Pam, _flags: PamFlags, _args: Vec<String>) -> PamError {
            PamError::SUCCESS
        }

        fn close_session(_pamh: Pam, _flags: PamFlags, _args: Vec<String>) -> PamError {
            PamError::SUCCESS
        }

        fn chauthtok(_pamh: Pam, _flags: PamFlags, _args: Vec<String>) -> PamError {
            PamError::IGNORE
        }
    }
}
