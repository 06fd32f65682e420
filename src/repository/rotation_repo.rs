// ==========================================
// Residency Scheduler - RotationTemplate repository
// ==========================================

use crate::domain::rotation::RotationTemplate;
use crate::domain::types::{ActivityCategory, TimeOfDay};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{get_enum, get_json};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

pub struct RotationTemplateRepository {
    conn: Arc<Mutex<Connection>>,
}

const SELECT_COLUMNS: &str = r#"SELECT template_id, name, category, eligible_pgy_levels,
    required_certification, required_specialty, min_residents, max_residents,
    faculty_capacity, supervision_ratio, senior_supervision_ratio, hours_per_block,
    time_of_day, active FROM rotation_template"#;

impl RotationTemplateRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn upsert(&self, t: &RotationTemplate) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT OR REPLACE INTO rotation_template (
                template_id, name, category, eligible_pgy_levels, required_certification,
                required_specialty, min_residents, max_residents, faculty_capacity,
                supervision_ratio, senior_supervision_ratio, hours_per_block, time_of_day, active
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                &t.template_id,
                &t.name,
                t.category.to_db_str(),
                serde_json::to_string(&t.eligible_pgy_levels)?,
                &t.required_certification,
                &t.required_specialty,
                t.min_residents,
                t.max_residents,
                t.faculty_capacity,
                t.supervision_ratio,
                t.senior_supervision_ratio,
                t.hours_per_block,
                t.time_of_day.map(|x| x.to_db_str()),
                t.active,
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, template_id: &str) -> RepositoryResult<Option<RotationTemplate>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE template_id = ?", SELECT_COLUMNS);
        match conn.query_row(&sql, params![template_id], Self::map_row) {
            Ok(t) => Ok(Some(t)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Active templates ordered by name (deterministic tie-breaks).
    pub fn list_active(&self) -> RepositoryResult<Vec<RotationTemplate>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE active = 1 ORDER BY name", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let templates = stmt
            .query_map([], Self::map_row)?
            .collect::<Result<Vec<RotationTemplate>, _>>()?;
        Ok(templates)
    }

    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<RotationTemplate> {
        Ok(RotationTemplate {
            template_id: row.get(0)?,
            name: row.get(1)?,
            category: get_enum(row, 2, ActivityCategory::from_str)?,
            eligible_pgy_levels: get_json(row, 3)?,
            required_certification: row.get(4)?,
            required_specialty: row.get(5)?,
            min_residents: row.get(6)?,
            max_residents: row.get(7)?,
            faculty_capacity: row.get(8)?,
            supervision_ratio: row.get(9)?,
            senior_supervision_ratio: row.get(10)?,
            hours_per_block: row.get(11)?,
            time_of_day: match row.get::<_, Option<String>>(12)? {
                Some(raw) => TimeOfDay::from_str(&raw),
                None => None,
            },
            active: row.get(13)?,
        })
    }
}
