//! Telemetry initialization (tracing/tracing-subscriber).
//!
//! Behavior:
//! - LOG_LEVEL controls the filter (e.g. "debug" or detailed directives like
//!   "info,questions=debug,session=debug,tower_http=info").
//! - LOG_FORMAT selects "pretty" (default) or "json" structured logs.
//!
//! Targets in use: `edutest` (lifecycle), `questions`, `explain`, `session`,
//! plus the crate module paths for instrumented spans.

use tracing_subscriber::EnvFilter;

/// Filter used by the server when LOG_LEVEL is unset.
pub const SERVER_DEFAULT_FILTER: &str =
    "info,edutest=debug,questions=debug,explain=debug,session=debug,tower_http=info,axum=info";

/// The terminal client keeps quiet unless asked; its output is the exam itself.
pub const CLI_DEFAULT_FILTER: &str = "warn";

pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new(default_filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr);

    match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => {
            builder.json().init();
        }
        _ => {
            builder.init();
        }
    }
}
