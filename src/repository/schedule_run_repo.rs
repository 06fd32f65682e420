// ==========================================
// Residency Scheduler - ScheduleRun repository
// ==========================================
// Append-only audit of solves.
// ==========================================

use crate::domain::schedule_run::ScheduleRun;
use crate::domain::types::SolverStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{fmt_date, fmt_datetime, get_date, get_datetime, get_json};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"SELECT run_id, start_date, end_date, solver_used, status,
    objective_score, seed, assignment_count, violations_json, attempts_json,
    fallback_reason, metrics_json, config_snapshot_json, committed, created_at
    FROM schedule_run"#;

pub struct ScheduleRunRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ScheduleRunRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn insert(&self, run: &ScheduleRun) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::insert_with(&conn, run)
    }

    pub fn insert_with(conn: &Connection, run: &ScheduleRun) -> RepositoryResult<()> {
        conn.execute(
            r#"INSERT INTO schedule_run (
                run_id, start_date, end_date, solver_used, status, objective_score, seed,
                assignment_count, violations_json, attempts_json, fallback_reason,
                metrics_json, config_snapshot_json, committed, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                &run.run_id,
                fmt_date(run.start_date),
                fmt_date(run.end_date),
                &run.solver_used,
                run.status.to_db_str(),
                run.objective_score,
                run.seed as i64,
                run.assignment_count as i64,
                &run.violations_json,
                serde_json::to_string(&run.attempts)?,
                &run.fallback_reason,
                &run.metrics_json,
                &run.config_snapshot_json,
                run.committed,
                fmt_datetime(run.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, run_id: &str) -> RepositoryResult<Option<ScheduleRun>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE run_id = ?", SELECT_COLUMNS);
        let run = conn.query_row(&sql, params![run_id], Self::map_row).optional()?;
        Ok(run)
    }

    /// Most recent runs first.
    pub fn list_recent(&self, limit: usize) -> RepositoryResult<Vec<ScheduleRun>> {
        let conn = self.get_conn()?;
        let sql = format!("{} ORDER BY created_at DESC, run_id LIMIT ?", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let runs = stmt
            .query_map(params![limit as i64], Self::map_row)?
            .collect::<Result<Vec<ScheduleRun>, _>>()?;
        Ok(runs)
    }

    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<ScheduleRun> {
        Ok(ScheduleRun {
            run_id: row.get(0)?,
            start_date: get_date(row, 1)?,
            end_date: get_date(row, 2)?,
            solver_used: row.get(3)?,
            status: SolverStatus::from_str(&row.get::<_, String>(4)?),
            objective_score: row.get(5)?,
            seed: row.get::<_, i64>(6)? as u64,
            assignment_count: row.get::<_, i64>(7)? as usize,
            violations_json: row.get(8)?,
            attempts: get_json(row, 9)?,
            fallback_reason: row.get(10)?,
            metrics_json: row.get(11)?,
            config_snapshot_json: row.get(12)?,
            committed: row.get(13)?,
            created_at: get_datetime(row, 14)?,
        })
    }
}
