//! Diagnostic logging
//!
//! A PAM module shares stderr with the calling program, which for sudo or
//! login is the user's terminal. Events are therefore buffered per thread
//! and handed to the PAM syslog when the call returns (see `drain`).
//! Setting `FINGWIT_LOG` also mirrors them to stderr for local debugging.

use std::cell::RefCell;
use std::fmt::{self, Write as _};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Environment variable overriding the log filter
pub const LOG_ENV: &str = "FINGWIT_LOG";

/// Lines kept per thread before the oldest are dropped
pub const MAX_PENDING: usize = 256;

thread_local! {
    static PENDING: RefCell<Vec<LogLine>> = RefCell::new(Vec::new());
}

/// One formatted event awaiting delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub level: Level,
    pub target: String,
    pub message: String,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.target, self.message)
    }
}

/// Layer that records events into the calling thread's buffer
#[derive(Debug, Default, Clone, Copy)]
pub struct CaptureLayer;

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);

        let metadata = event.metadata();
        let line = LogLine {
            level: *metadata.level(),
            target: metadata.target().to_string(),
            message: visitor.finish(),
        };

        PENDING.with(|pending| {
            let mut pending = pending.borrow_mut();
            if pending.len() >= MAX_PENDING {
                pending.remove(0);
            }
            pending.push(line);
        });
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl LineVisitor {
    fn finish(mut self) -> String {
        self.message.push_str(&self.fields);
        self.message
    }
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

/// Install the buffering subscriber
///
/// The module may be loaded many times in one process (or next to another
/// subscriber); only the first install wins and later calls are no-ops.
pub fn init(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));

    let mirror = std::env::var_os(LOG_ENV).is_some().then(|| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(std::io::stderr)
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(CaptureLayer)
        .with(mirror)
        .try_init();
}

/// Take every line buffered on this thread
pub fn drain() -> Vec<LogLine> {
    PENDING.with(|pending| std::mem::take(&mut *pending.borrow_mut()))
}
