// ==========================================
// Residency Scheduler - Performance instrumentation
// ==========================================
// SQLite statement counting and slow-query logging, per-operation timing
// guards and the peak memory reading used by solver profiling.
// Output goes to the `perf` and `slow_sql` tracing targets.
// ==========================================

use rusqlite::Connection;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

const PERF_SQL_ENV: &str = "RESIDENCY_SCHEDULER_PERF_SQL";
const SLOW_SQL_MS_ENV: &str = "RESIDENCY_SCHEDULER_SLOW_SQL_MS";
const SQL_LOG_MAX_CHARS: usize = 400;

static SQL_HOOKS_ON: AtomicBool = AtomicBool::new(false);
static SLOW_SQL_MS: AtomicU64 = AtomicU64::new(0);

/// Statement counters of the current thread while a guard is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SqlCounters {
    pub statements: u64,
    pub slow: u64,
}

thread_local! {
    static OPEN_GUARDS: Cell<u32> = Cell::new(0);
    static COUNTERS: Cell<SqlCounters> = Cell::new(SqlCounters::default());
}

// ==========================================
// Settings
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlPerfSettings {
    pub enabled: bool,
    /// 0 disables the slow-query log
    pub slow_ms: u64,
}

impl SqlPerfSettings {
    /// Debug builds count SQL by default; `RESIDENCY_SCHEDULER_PERF_SQL`
    /// overrides either way and `RESIDENCY_SCHEDULER_SLOW_SQL_MS` sets the
    /// threshold (50ms debug, 200ms release).
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup(PERF_SQL_ENV)
            .map(|v| flag_value(&v))
            .unwrap_or(cfg!(debug_assertions));
        let slow_ms = lookup(SLOW_SQL_MS_ENV)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(if cfg!(debug_assertions) { 50 } else { 200 });
        Self { enabled, slow_ms }
    }
}

fn flag_value(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn one_line_sql(sql: &str) -> String {
    let flat: String = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(SQL_LOG_MAX_CHARS) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}

// ==========================================
// SQLite hooks
// ==========================================

/// Install trace/profile hooks according to the environment.
pub fn install_sqlite_tracing(conn: &mut Connection) {
    install_sqlite_tracing_with(conn, SqlPerfSettings::from_env());
}

pub fn install_sqlite_tracing_with(conn: &mut Connection, settings: SqlPerfSettings) {
    SQL_HOOKS_ON.store(settings.enabled, Ordering::Relaxed);
    SLOW_SQL_MS.store(settings.slow_ms, Ordering::Relaxed);

    if settings.enabled {
        conn.trace(Some(on_statement));
        conn.profile(Some(on_statement_done));
    } else {
        // a reused connection may still carry hooks
        conn.trace(None);
        conn.profile(None);
    }
}

fn guard_open() -> bool {
    OPEN_GUARDS.with(|g| g.get() > 0)
}

fn bump(f: impl FnOnce(&mut SqlCounters)) {
    COUNTERS.with(|c| {
        let mut counters = c.get();
        f(&mut counters);
        c.set(counters);
    });
}

fn on_statement(_sql: &str) {
    if SQL_HOOKS_ON.load(Ordering::Relaxed) && guard_open() {
        bump(|c| c.statements = c.statements.saturating_add(1));
    }
}

fn on_statement_done(sql: &str, took: Duration) {
    if !SQL_HOOKS_ON.load(Ordering::Relaxed) {
        return;
    }
    let threshold = SLOW_SQL_MS.load(Ordering::Relaxed);
    let took_ms = took.as_millis() as u64;
    if threshold == 0 || took_ms < threshold {
        return;
    }
    tracing::warn!(target: "slow_sql", took_ms, sql = %one_line_sql(sql), "slow sql");
    if guard_open() {
        bump(|c| c.slow = c.slow.saturating_add(1));
    }
}

// ==========================================
// PerfGuard
// ==========================================

/// Times one repository/engine operation and logs it on drop together with
/// the SQL statements it issued on this thread.
///
/// ```ignore
/// let _perf = residency_scheduler::perf::PerfGuard::new("persist_schedule_run");
/// ```
pub struct PerfGuard {
    op: &'static str,
    started: Instant,
    baseline: SqlCounters,
}

impl PerfGuard {
    pub fn new(op: &'static str) -> Self {
        OPEN_GUARDS.with(|g| g.set(g.get().saturating_add(1)));
        Self {
            op,
            started: Instant::now(),
            baseline: COUNTERS.with(|c| c.get()),
        }
    }

    /// Statements issued since the guard opened.
    pub fn sql(&self) -> SqlCounters {
        let now = COUNTERS.with(|c| c.get());
        SqlCounters {
            statements: now.statements.saturating_sub(self.baseline.statements),
            slow: now.slow.saturating_sub(self.baseline.slow),
        }
    }
}

impl Drop for PerfGuard {
    fn drop(&mut self) {
        let sql = self.sql();
        tracing::info!(
            target: "perf",
            op = self.op,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            sql_count = sql.statements,
            slow_sql_count = sql.slow,
            "operation finished"
        );
        OPEN_GUARDS.with(|g| g.set(g.get().saturating_sub(1)));
    }
}

/// Peak resident set size of this process in KiB (VmHWM), when the platform
/// exposes it.
pub fn peak_memory_kb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    status
        .lines()
        .find(|l| l.starts_with("VmHWM:"))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|v| v.parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_lookup() {
        let on = SqlPerfSettings::from_lookup(|k| match k {
            PERF_SQL_ENV => Some(" Yes ".to_string()),
            SLOW_SQL_MS_ENV => Some("75".to_string()),
            _ => None,
        });
        assert_eq!(on, SqlPerfSettings { enabled: true, slow_ms: 75 });

        let off = SqlPerfSettings::from_lookup(|k| (k == PERF_SQL_ENV).then(|| "off".to_string()));
        assert!(!off.enabled);
    }

    #[test]
    fn test_one_line_sql() {
        assert_eq!(one_line_sql("SELECT\n  *\nFROM person"), "SELECT * FROM person");
        let long = "x".repeat(SQL_LOG_MAX_CHARS + 10);
        assert_eq!(one_line_sql(&long).len(), SQL_LOG_MAX_CHARS + 3);
    }

    #[test]
    fn test_guard_counts_statements_on_its_thread() {
        let mut conn = Connection::open_in_memory().unwrap();
        install_sqlite_tracing_with(&mut conn, SqlPerfSettings { enabled: true, slow_ms: 0 });

        conn.execute_batch("CREATE TABLE t (v INTEGER)").unwrap();
        let guard = PerfGuard::new("insert_rows");
        conn.execute("INSERT INTO t (v) VALUES (1)", []).unwrap();
        conn.execute("INSERT INTO t (v) VALUES (2)", []).unwrap();
        assert!(guard.sql().statements >= 2);
        assert_eq!(guard.sql().slow, 0);
    }
}
