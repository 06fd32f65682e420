// ==========================================
// Residency Scheduler - SQLite connection setup
// ==========================================
// - One place for PRAGMA behaviour so every connection enforces foreign keys
// - One busy_timeout so concurrent writers do not fail spuriously
// - Schema bootstrap for fresh databases (idempotent)
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// Default busy_timeout (ms)
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Schema version written by `init_schema`.
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// Apply the shared PRAGMAs.
///
/// foreign_keys and busy_timeout are per-connection settings.
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// Open a connection and apply the shared configuration.
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let mut conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    crate::perf::install_sqlite_tracing(&mut conn);
    Ok(conn)
}

/// Read schema_version (None when the table does not exist).
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// Create all tables if missing and record the schema version.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS config_scope (
    scope_id TEXT PRIMARY KEY,
    scope_type TEXT NOT NULL,
    scope_key TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(scope_type, scope_key)
);

INSERT OR IGNORE INTO config_scope (scope_id, scope_type, scope_key)
VALUES ('global', 'GLOBAL', 'global');

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id TEXT NOT NULL REFERENCES config_scope(scope_id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);

CREATE TABLE IF NOT EXISTS person (
    person_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    role TEXT NOT NULL,
    pgy_level INTEGER,
    certifications TEXT NOT NULL DEFAULT '[]',
    specialty TEXT,
    active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS block (
    block_id TEXT PRIMARY KEY,
    block_date TEXT NOT NULL,
    time_of_day TEXT NOT NULL,
    UNIQUE(block_date, time_of_day)
);

CREATE TABLE IF NOT EXISTS rotation_template (
    template_id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    category TEXT NOT NULL,
    eligible_pgy_levels TEXT NOT NULL DEFAULT '[]',
    required_certification TEXT,
    required_specialty TEXT,
    min_residents INTEGER NOT NULL DEFAULT 0,
    max_residents INTEGER NOT NULL DEFAULT 0,
    faculty_capacity INTEGER NOT NULL DEFAULT 0,
    supervision_ratio INTEGER NOT NULL DEFAULT 2,
    senior_supervision_ratio INTEGER,
    hours_per_block REAL,
    time_of_day TEXT,
    active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS absence (
    absence_id TEXT PRIMARY KEY,
    person_id TEXT NOT NULL REFERENCES person(person_id),
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    reason TEXT
);

CREATE TABLE IF NOT EXISTS preference (
    preference_id TEXT PRIMARY KEY,
    person_id TEXT NOT NULL REFERENCES person(person_id),
    kind TEXT NOT NULL,
    template_id TEXT REFERENCES rotation_template(template_id),
    pref_date TEXT,
    weight REAL NOT NULL DEFAULT 1.0
);

CREATE TABLE IF NOT EXISTS schedule_run (
    run_id TEXT PRIMARY KEY,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    solver_used TEXT NOT NULL,
    status TEXT NOT NULL,
    objective_score REAL NOT NULL,
    seed INTEGER NOT NULL,
    assignment_count INTEGER NOT NULL,
    violations_json TEXT NOT NULL DEFAULT '[]',
    attempts_json TEXT NOT NULL DEFAULT '[]',
    fallback_reason TEXT,
    metrics_json TEXT,
    config_snapshot_json TEXT,
    committed INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS assignment (
    assignment_id TEXT PRIMARY KEY,
    person_id TEXT NOT NULL REFERENCES person(person_id),
    block_id TEXT NOT NULL REFERENCES block(block_id),
    template_id TEXT NOT NULL REFERENCES rotation_template(template_id),
    rationale TEXT,
    confidence REAL NOT NULL DEFAULT 1.0,
    version INTEGER NOT NULL DEFAULT 1,
    active INTEGER NOT NULL DEFAULT 1,
    superseded_by TEXT,
    source TEXT NOT NULL,
    schedule_run_id TEXT REFERENCES schedule_run(run_id),
    locked INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_assignment_person_active ON assignment(person_id, active);
CREATE INDEX IF NOT EXISTS idx_assignment_block_active ON assignment(block_id, active);

CREATE TABLE IF NOT EXISTS swap_record (
    swap_id TEXT PRIMARY KEY,
    idempotency_key TEXT NOT NULL UNIQUE,
    source_assignment_id TEXT NOT NULL,
    target_json TEXT NOT NULL,
    person_ids_json TEXT NOT NULL DEFAULT '[]',
    changes_json TEXT NOT NULL,
    decision TEXT NOT NULL,
    warnings_json TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL,
    executed_at TEXT NOT NULL,
    rollback_deadline TEXT NOT NULL,
    rolled_back_at TEXT,
    actor TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS conflict_record (
    conflict_id TEXT PRIMARY KEY,
    fingerprint TEXT NOT NULL UNIQUE,
    conflict_type TEXT NOT NULL,
    severity TEXT NOT NULL,
    person_id TEXT,
    affected_assignment_ids TEXT NOT NULL DEFAULT '[]',
    description TEXT NOT NULL,
    detected_at TEXT NOT NULL,
    resolution_status TEXT NOT NULL DEFAULT 'OPEN',
    resolution_detail TEXT,
    swap_id TEXT
);
"#;
