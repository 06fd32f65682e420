// ==========================================
// Residency Scheduler - SwapRecord repository
// ==========================================
// idempotency_key is UNIQUE: a replayed request finds the first record.
// ==========================================

use crate::domain::swap::SwapRecord;
use crate::domain::types::SwapStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{fmt_datetime, get_datetime, get_json, get_opt_datetime};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"SELECT swap_id, idempotency_key, source_assignment_id,
    target_json, person_ids_json, changes_json, decision, warnings_json, status, executed_at,
    rollback_deadline, rolled_back_at, actor
    FROM swap_record"#;

pub struct SwapRecordRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SwapRecordRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn insert_with(conn: &Connection, record: &SwapRecord) -> RepositoryResult<()> {
        conn.execute(
            r#"INSERT INTO swap_record (
                swap_id, idempotency_key, source_assignment_id, target_json, person_ids_json,
                changes_json, decision, warnings_json, status, executed_at, rollback_deadline,
                rolled_back_at, actor
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                &record.swap_id,
                &record.idempotency_key,
                &record.source_assignment_id,
                &record.target_json,
                serde_json::to_string(&record.person_ids)?,
                serde_json::to_string(&record.changes)?,
                &record.decision,
                serde_json::to_string(&record.warnings)?,
                record.status.to_db_str(),
                fmt_datetime(record.executed_at),
                fmt_datetime(record.rollback_deadline),
                record.rolled_back_at.map(fmt_datetime),
                &record.actor,
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, swap_id: &str) -> RepositoryResult<Option<SwapRecord>> {
        let conn = self.get_conn()?;
        Self::find_by_id_with(&conn, swap_id)
    }

    pub fn find_by_id_with(conn: &Connection, swap_id: &str) -> RepositoryResult<Option<SwapRecord>> {
        let sql = format!("{} WHERE swap_id = ?", SELECT_COLUMNS);
        Ok(conn.query_row(&sql, params![swap_id], Self::map_row).optional()?)
    }

    pub fn find_by_idempotency_key(&self, key: &str) -> RepositoryResult<Option<SwapRecord>> {
        let conn = self.get_conn()?;
        Self::find_by_idempotency_key_with(&conn, key)
    }

    pub fn find_by_idempotency_key_with(
        conn: &Connection,
        key: &str,
    ) -> RepositoryResult<Option<SwapRecord>> {
        let sql = format!("{} WHERE idempotency_key = ?", SELECT_COLUMNS);
        Ok(conn.query_row(&sql, params![key], Self::map_row).optional()?)
    }

    /// EXECUTED -> ROLLED_BACK; a record already rolled back is left alone.
    pub fn mark_rolled_back_with(
        conn: &Connection,
        swap_id: &str,
        at: NaiveDateTime,
    ) -> RepositoryResult<()> {
        let rows_affected = conn.execute(
            r#"UPDATE swap_record SET status = ?, rolled_back_at = ?
               WHERE swap_id = ? AND status = ?"#,
            params![
                SwapStatus::RolledBack.to_db_str(),
                fmt_datetime(at),
                swap_id,
                SwapStatus::Executed.to_db_str(),
            ],
        )?;
        if rows_affected == 0 {
            return Err(RepositoryError::StaleRecord {
                entity: "SwapRecord".to_string(),
                id: swap_id.to_string(),
            });
        }
        Ok(())
    }

    /// Swaps executed since `since`, newest first.
    pub fn list_since(&self, since: NaiveDateTime) -> RepositoryResult<Vec<SwapRecord>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE executed_at >= ? ORDER BY executed_at DESC, swap_id",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![fmt_datetime(since)], Self::map_row)?
            .collect::<Result<Vec<SwapRecord>, _>>()?;
        Ok(records)
    }

    /// Swaps that changed the given person's schedule, newest first.
    pub fn list_for_person(&self, person_id: &str) -> RepositoryResult<Vec<SwapRecord>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"{} WHERE EXISTS (SELECT 1 FROM json_each(swap_record.person_ids_json) WHERE value = ?)
               ORDER BY executed_at DESC, swap_id"#,
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![person_id], Self::map_row)?
            .collect::<Result<Vec<SwapRecord>, _>>()?;
        Ok(records)
    }

    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<SwapRecord> {
        Ok(SwapRecord {
            swap_id: row.get(0)?,
            idempotency_key: row.get(1)?,
            source_assignment_id: row.get(2)?,
            target_json: row.get(3)?,
            person_ids: get_json(row, 4)?,
            changes: get_json(row, 5)?,
            decision: row.get(6)?,
            warnings: get_json(row, 7)?,
            status: SwapStatus::from_str(&row.get::<_, String>(8)?),
            executed_at: get_datetime(row, 9)?,
            rollback_deadline: get_datetime(row, 10)?,
            rolled_back_at: get_opt_datetime(row, 11)?,
            actor: row.get(12)?,
        })
    }
}
