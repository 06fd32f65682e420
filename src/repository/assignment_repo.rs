// ==========================================
// Residency Scheduler - Assignment repository
// ==========================================
// Concurrency: optimistic locking on assignment.version
// Rows are never deleted: changes supersede (active=0) and insert.
// `*_with` functions take a borrowed connection so callers can compose
// several writes inside one transaction.
// ==========================================

use crate::domain::assignment::Assignment;
use crate::domain::types::AssignmentSource;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{fmt_date, fmt_datetime, get_datetime};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"SELECT a.assignment_id, a.person_id, a.block_id, a.template_id,
    a.rationale, a.confidence, a.version, a.active, a.superseded_by, a.source,
    a.schedule_run_id, a.locked, a.created_at
    FROM assignment a"#;

pub struct AssignmentRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AssignmentRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // Reads
    // ==========================================

    pub fn find_by_id(&self, assignment_id: &str) -> RepositoryResult<Option<Assignment>> {
        let conn = self.get_conn()?;
        Self::find_by_id_with(&conn, assignment_id)
    }

    pub fn find_by_id_with(
        conn: &Connection,
        assignment_id: &str,
    ) -> RepositoryResult<Option<Assignment>> {
        let sql = format!("{} WHERE a.assignment_id = ?", SELECT_COLUMNS);
        let found = conn
            .query_row(&sql, params![assignment_id], Self::map_row)
            .optional()?;
        Ok(found)
    }

    /// Active assignments whose block date lies in [start, end].
    ///
    /// Ordered by block date, time of day, person.
    pub fn list_active_in_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> RepositoryResult<Vec<Assignment>> {
        let conn = self.get_conn()?;
        Self::list_active_in_range_with(&conn, start, end)
    }

    pub fn list_active_in_range_with(
        conn: &Connection,
        start: NaiveDate,
        end: NaiveDate,
    ) -> RepositoryResult<Vec<Assignment>> {
        let sql = format!(
            r#"{} JOIN block b ON b.block_id = a.block_id
               WHERE a.active = 1 AND b.block_date >= ? AND b.block_date <= ?
               ORDER BY b.block_date, b.time_of_day, a.person_id, a.assignment_id"#,
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![fmt_date(start), fmt_date(end)], Self::map_row)?
            .collect::<Result<Vec<Assignment>, _>>()?;
        Ok(rows)
    }

    /// Active assignments of one person in [start, end].
    pub fn list_active_for_person(
        &self,
        person_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> RepositoryResult<Vec<Assignment>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"{} JOIN block b ON b.block_id = a.block_id
               WHERE a.active = 1 AND a.person_id = ? AND b.block_date >= ? AND b.block_date <= ?
               ORDER BY b.block_date, b.time_of_day"#,
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![person_id, fmt_date(start), fmt_date(end)],
                Self::map_row,
            )?
            .collect::<Result<Vec<Assignment>, _>>()?;
        Ok(rows)
    }

    /// Active assignments of one block.
    pub fn list_active_for_block(&self, block_id: &str) -> RepositoryResult<Vec<Assignment>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE a.active = 1 AND a.block_id = ? ORDER BY a.template_id, a.person_id",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![block_id], Self::map_row)?
            .collect::<Result<Vec<Assignment>, _>>()?;
        Ok(rows)
    }

    /// Active rows a person holds in one block (0 or 1 unless the store is
    /// already double-booked).
    pub fn count_active_for_person_block_with(
        conn: &Connection,
        person_id: &str,
        block_id: &str,
    ) -> RepositoryResult<usize> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM assignment WHERE active = 1 AND person_id = ? AND block_id = ?",
            params![person_id, block_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Every row (active or not) produced by one schedule run.
    pub fn list_by_run(&self, run_id: &str) -> RepositoryResult<Vec<Assignment>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE a.schedule_run_id = ? ORDER BY a.block_id, a.person_id",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![run_id], Self::map_row)?
            .collect::<Result<Vec<Assignment>, _>>()?;
        Ok(rows)
    }

    // ==========================================
    // Writes
    // ==========================================

    pub fn insert(&self, assignment: &Assignment) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::insert_with(&conn, assignment)
    }

    pub fn insert_with(conn: &Connection, a: &Assignment) -> RepositoryResult<()> {
        conn.execute(
            r#"INSERT INTO assignment (
                assignment_id, person_id, block_id, template_id, rationale, confidence,
                version, active, superseded_by, source, schedule_run_id, locked, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                &a.assignment_id,
                &a.person_id,
                &a.block_id,
                &a.template_id,
                &a.rationale,
                a.confidence,
                a.version,
                a.active,
                &a.superseded_by,
                a.source.to_db_str(),
                &a.schedule_run_id,
                a.locked,
                fmt_datetime(a.created_at),
            ],
        )?;
        Ok(())
    }

    /// Insert many rows in one transaction.
    pub fn batch_insert(&self, assignments: &[Assignment]) -> RepositoryResult<usize> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        for a in assignments {
            Self::insert_with(&tx, a)?;
        }
        tx.commit()?;
        Ok(assignments.len())
    }

    /// Deactivate one row with a version check.
    ///
    /// # Errors
    /// - `OptimisticLockFailure`: version moved since the caller read it
    /// - `StaleRecord`: version matches but the row is no longer active
    /// - `NotFound`: no such assignment
    pub fn supersede_with(
        conn: &Connection,
        assignment_id: &str,
        expected_version: i32,
        superseded_by: Option<&str>,
    ) -> RepositoryResult<i32> {
        let rows_affected = conn.execute(
            r#"UPDATE assignment
               SET active = 0, superseded_by = ?, version = version + 1
               WHERE assignment_id = ? AND version = ? AND active = 1"#,
            params![superseded_by, assignment_id, expected_version],
        )?;

        if rows_affected == 0 {
            return Err(Self::explain_missed_update(conn, assignment_id, expected_version)?);
        }
        Ok(expected_version + 1)
    }

    /// Reactivate a superseded row (rollback path) with a version check.
    pub fn reactivate_with(
        conn: &Connection,
        assignment_id: &str,
        expected_version: i32,
    ) -> RepositoryResult<i32> {
        let rows_affected = conn.execute(
            r#"UPDATE assignment
               SET active = 1, superseded_by = NULL, version = version + 1
               WHERE assignment_id = ? AND version = ? AND active = 0"#,
            params![assignment_id, expected_version],
        )?;

        if rows_affected == 0 {
            return Err(Self::explain_missed_update(conn, assignment_id, expected_version)?);
        }
        Ok(expected_version + 1)
    }

    /// Work out why a versioned UPDATE touched no row.
    fn explain_missed_update(
        conn: &Connection,
        assignment_id: &str,
        expected_version: i32,
    ) -> RepositoryResult<RepositoryError> {
        let actual: Option<i32> = conn
            .query_row(
                "SELECT version FROM assignment WHERE assignment_id = ?",
                params![assignment_id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(match actual {
            None => RepositoryError::NotFound {
                entity: "Assignment".to_string(),
                id: assignment_id.to_string(),
            },
            Some(actual) if actual != expected_version => RepositoryError::OptimisticLockFailure {
                entity: "Assignment".to_string(),
                id: assignment_id.to_string(),
                expected: expected_version,
                actual,
            },
            Some(_) => RepositoryError::StaleRecord {
                entity: "Assignment".to_string(),
                id: assignment_id.to_string(),
            },
        })
    }

    /// Deactivate unlocked active rows in [start, end] before a regeneration
    /// commit. Locked rows survive.
    ///
    /// # Returns
    /// Number of rows superseded
    pub fn supersede_unlocked_in_range_with(
        conn: &Connection,
        start: NaiveDate,
        end: NaiveDate,
        marker: &str,
    ) -> RepositoryResult<usize> {
        let count = conn.execute(
            r#"UPDATE assignment
               SET active = 0, superseded_by = ?, version = version + 1
               WHERE active = 1 AND locked = 0 AND block_id IN (
                   SELECT block_id FROM block WHERE block_date >= ? AND block_date <= ?
               )"#,
            params![marker, fmt_date(start), fmt_date(end)],
        )?;
        Ok(count)
    }

    /// Pin active rows inside a regeneration transaction (request-level locks).
    ///
    /// # Returns
    /// Number of rows newly locked
    pub fn lock_ids_with(conn: &Connection, assignment_ids: &[String]) -> RepositoryResult<usize> {
        let mut count = 0;
        for id in assignment_ids {
            count += conn.execute(
                r#"UPDATE assignment SET locked = 1, version = version + 1
                   WHERE assignment_id = ? AND active = 1 AND locked = 0"#,
                params![id],
            )?;
        }
        Ok(count)
    }

    /// Pin or unpin an assignment against regeneration.
    pub fn set_locked(
        &self,
        assignment_id: &str,
        expected_version: i32,
        locked: bool,
    ) -> RepositoryResult<i32> {
        let conn = self.get_conn()?;
        let rows_affected = conn.execute(
            r#"UPDATE assignment SET locked = ?, version = version + 1
               WHERE assignment_id = ? AND version = ? AND active = 1"#,
            params![locked, assignment_id, expected_version],
        )?;
        if rows_affected == 0 {
            return Err(Self::explain_missed_update(&conn, assignment_id, expected_version)?);
        }
        Ok(expected_version + 1)
    }

    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<Assignment> {
        Ok(Assignment {
            assignment_id: row.get(0)?,
            person_id: row.get(1)?,
            block_id: row.get(2)?,
            template_id: row.get(3)?,
            rationale: row.get(4)?,
            confidence: row.get(5)?,
            version: row.get(6)?,
            active: row.get(7)?,
            superseded_by: row.get(8)?,
            source: AssignmentSource::from_str(&row.get::<_, String>(9)?),
            schedule_run_id: row.get(10)?,
            locked: row.get(11)?,
            created_at: get_datetime(row, 12)?,
        })
    }
}
