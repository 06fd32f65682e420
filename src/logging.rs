// ==========================================
// Residency Scheduler - Log output
// ==========================================
// One subscriber per process, stderr only (stdout carries command JSON).
// Human-readable lines for operators at a terminal, JSON lines for log
// shippers. Solver progress, swap decisions and conflict scans log under
// their module paths; query timing goes to the `perf` and `slow_sql`
// targets (see perf.rs).
// ==========================================

use tracing_subscriber::{fmt, EnvFilter};

const LOG_FORMAT_ENV: &str = "RESIDENCY_SCHEDULER_LOG_FORMAT";

/// Used when RUST_LOG is unset: engine at info, per-operation timing only
/// when it turns slow.
const DEFAULT_DIRECTIVES: &str = "info,perf=warn,slow_sql=warn";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// `RESIDENCY_SCHEDULER_LOG_FORMAT=json` switches to JSON lines; anything
    /// else (or unset) keeps `fallback`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>, fallback: LogFormat) -> Self {
        match lookup(LOG_FORMAT_ENV).map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "json" => LogFormat::Json,
            Some(v) if v == "text" => LogFormat::Text,
            _ => fallback,
        }
    }
}

/// RUST_LOG when set and parseable, otherwise [`DEFAULT_DIRECTIVES`].
///
/// e.g. `RUST_LOG=residency_scheduler::engine::swap=trace,perf=info` traces
/// swap validation and prints every timed operation.
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Install the global subscriber in the format picked by the environment.
///
/// ```no_run
/// use residency_scheduler::logging;
/// logging::init();
/// ```
pub fn init() {
    init_with(LogFormat::from_lookup(|k| std::env::var(k).ok(), LogFormat::Text));
}

/// JSON lines regardless of the environment (`--json-logs`).
pub fn init_json() {
    init_with(LogFormat::Json);
}

pub fn init_with(format: LogFormat) {
    let builder = fmt().with_env_filter(env_filter()).with_writer(std::io::stderr);
    let installed = match format {
        LogFormat::Text => builder.with_target(true).with_line_number(true).try_init(),
        LogFormat::Json => builder.json().with_current_span(false).try_init(),
    };
    if installed.is_err() {
        tracing::debug!("log subscriber already installed");
    }
}

/// Debug level, captured per test by the harness.
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug,residency_scheduler::engine::solver=info"))
        .with_test_writer()
        .try_init();
}
