// ==========================================
// Residency Scheduler - Absence repository
// ==========================================

use crate::domain::person::Absence;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{fmt_date, get_date};
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

pub struct AbsenceRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AbsenceRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn insert(&self, absence: &Absence) -> RepositoryResult<()> {
        if absence.end_date < absence.start_date {
            return Err(RepositoryError::FieldValueError {
                field: "end_date".to_string(),
                message: format!("{} is before start_date {}", absence.end_date, absence.start_date),
            });
        }
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO absence (absence_id, person_id, start_date, end_date, reason) VALUES (?, ?, ?, ?, ?)",
            params![
                &absence.absence_id,
                &absence.person_id,
                fmt_date(absence.start_date),
                fmt_date(absence.end_date),
                &absence.reason,
            ],
        )?;
        Ok(())
    }

    /// Absences overlapping [start, end].
    pub fn list_overlapping(&self, start: NaiveDate, end: NaiveDate) -> RepositoryResult<Vec<Absence>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT absence_id, person_id, start_date, end_date, reason FROM absence
               WHERE start_date <= ? AND end_date >= ?
               ORDER BY person_id, start_date, absence_id"#,
        )?;
        let absences = stmt
            .query_map(params![fmt_date(end), fmt_date(start)], |row| {
                Ok(Absence {
                    absence_id: row.get(0)?,
                    person_id: row.get(1)?,
                    start_date: get_date(row, 2)?,
                    end_date: get_date(row, 3)?,
                    reason: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<Absence>, _>>()?;
        Ok(absences)
    }
}
