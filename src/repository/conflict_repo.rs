// ==========================================
// Residency Scheduler - ConflictRecord repository
// ==========================================
// Rescans upsert on fingerprint, so detection is idempotent.
// ==========================================

use crate::domain::conflict::ConflictRecord;
use crate::domain::types::{ConflictType, ResolutionStatus, Severity};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{fmt_datetime, get_datetime, get_enum, get_json};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"SELECT conflict_id, fingerprint, conflict_type, severity,
    person_id, affected_assignment_ids, description, detected_at, resolution_status,
    resolution_detail, swap_id
    FROM conflict_record"#;

pub struct ConflictRecordRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ConflictRecordRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// Insert a new conflict or refresh the existing row with the same fingerprint.
    ///
    /// Resolution state of an existing row is kept.
    ///
    /// # Returns
    /// (conflict_id of the stored row, true when a new row was created)
    pub fn upsert(&self, record: &ConflictRecord) -> RepositoryResult<(String, bool)> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT conflict_id FROM conflict_record WHERE fingerprint = ?",
                params![&record.fingerprint],
                |row| row.get(0),
            )
            .optional()?;

        let result = match existing {
            Some(conflict_id) => {
                tx.execute(
                    r#"UPDATE conflict_record
                       SET severity = ?, description = ?, affected_assignment_ids = ?, detected_at = ?
                       WHERE conflict_id = ?"#,
                    params![
                        record.severity.to_db_str(),
                        &record.description,
                        serde_json::to_string(&record.affected_assignment_ids)?,
                        fmt_datetime(record.detected_at),
                        &conflict_id,
                    ],
                )?;
                (conflict_id, false)
            }
            None => {
                tx.execute(
                    r#"INSERT INTO conflict_record (
                        conflict_id, fingerprint, conflict_type, severity, person_id,
                        affected_assignment_ids, description, detected_at, resolution_status,
                        resolution_detail, swap_id
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
                    params![
                        &record.conflict_id,
                        &record.fingerprint,
                        record.conflict_type.to_db_str(),
                        record.severity.to_db_str(),
                        &record.person_id,
                        serde_json::to_string(&record.affected_assignment_ids)?,
                        &record.description,
                        fmt_datetime(record.detected_at),
                        record.resolution_status.to_db_str(),
                        &record.resolution_detail,
                        &record.swap_id,
                    ],
                )?;
                (record.conflict_id.clone(), true)
            }
        };

        tx.commit()?;
        Ok(result)
    }

    pub fn find_by_id(&self, conflict_id: &str) -> RepositoryResult<Option<ConflictRecord>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE conflict_id = ?", SELECT_COLUMNS);
        Ok(conn.query_row(&sql, params![conflict_id], Self::map_row).optional()?)
    }

    /// Open conflicts, most severe first.
    pub fn list_open(&self) -> RepositoryResult<Vec<ConflictRecord>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"{} WHERE resolution_status = 'OPEN'
               ORDER BY CASE severity
                   WHEN 'CRITICAL' THEN 0 WHEN 'HIGH' THEN 1 WHEN 'MEDIUM' THEN 2 ELSE 3 END,
                   conflict_type, fingerprint"#,
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map([], Self::map_row)?
            .collect::<Result<Vec<ConflictRecord>, _>>()?;
        Ok(records)
    }

    pub fn list_all(&self) -> RepositoryResult<Vec<ConflictRecord>> {
        let conn = self.get_conn()?;
        let sql = format!("{} ORDER BY detected_at, fingerprint", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map([], Self::map_row)?
            .collect::<Result<Vec<ConflictRecord>, _>>()?;
        Ok(records)
    }

    pub fn update_resolution(
        &self,
        conflict_id: &str,
        status: ResolutionStatus,
        detail: Option<&str>,
        swap_id: Option<&str>,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows_affected = conn.execute(
            r#"UPDATE conflict_record SET resolution_status = ?, resolution_detail = ?, swap_id = ?
               WHERE conflict_id = ?"#,
            params![status.to_db_str(), detail, swap_id, conflict_id],
        )?;
        if rows_affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "ConflictRecord".to_string(),
                id: conflict_id.to_string(),
            });
        }
        Ok(())
    }

    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<ConflictRecord> {
        Ok(ConflictRecord {
            conflict_id: row.get(0)?,
            fingerprint: row.get(1)?,
            conflict_type: get_enum(row, 2, ConflictType::from_str)?,
            severity: Severity::from_str(&row.get::<_, String>(3)?),
            person_id: row.get(4)?,
            affected_assignment_ids: get_json(row, 5)?,
            description: row.get(6)?,
            detected_at: get_datetime(row, 7)?,
            resolution_status: ResolutionStatus::from_str(&row.get::<_, String>(8)?),
            resolution_detail: row.get(9)?,
            swap_id: row.get(10)?,
        })
    }
}
