// ==========================================
// Residency Scheduler - Person / preference repository
// ==========================================
// Repository holds no business logic
// ==========================================

use crate::domain::person::{Person, Preference};
use crate::domain::types::{PreferenceKind, Role};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{fmt_date, get_enum, get_json, get_opt_date};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

// ==========================================
// PersonRepository
// ==========================================
pub struct PersonRepository {
    conn: Arc<Mutex<Connection>>,
}

impl PersonRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// Insert or replace a person (onboarding / yearly PGY transition).
    pub fn upsert(&self, person: &Person) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT INTO person (person_id, name, role, pgy_level, certifications, specialty, active)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(person_id) DO UPDATE SET
                   name = excluded.name, role = excluded.role, pgy_level = excluded.pgy_level,
                   certifications = excluded.certifications, specialty = excluded.specialty,
                   active = excluded.active"#,
            params![
                &person.person_id,
                &person.name,
                person.role.to_db_str(),
                person.pgy_level.map(|l| l as i64),
                serde_json::to_string(&person.certifications)?,
                &person.specialty,
                person.active,
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, person_id: &str) -> RepositoryResult<Option<Person>> {
        let conn = self.get_conn()?;
        match conn.query_row(
            r#"SELECT person_id, name, role, pgy_level, certifications, specialty, active
               FROM person WHERE person_id = ?"#,
            params![person_id],
            Self::map_row,
        ) {
            Ok(p) => Ok(Some(p)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Active roster ordered by person_id.
    pub fn list_active(&self) -> RepositoryResult<Vec<Person>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT person_id, name, role, pgy_level, certifications, specialty, active
               FROM person WHERE active = 1 ORDER BY person_id"#,
        )?;
        let people = stmt
            .query_map([], Self::map_row)?
            .collect::<Result<Vec<Person>, _>>()?;
        Ok(people)
    }

    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<Person> {
        Ok(Person {
            person_id: row.get(0)?,
            name: row.get(1)?,
            role: get_enum(row, 2, Role::from_str)?,
            pgy_level: row.get::<_, Option<i64>>(3)?.map(|l| l as u8),
            certifications: get_json(row, 4)?,
            specialty: row.get(5)?,
            active: row.get(6)?,
        })
    }
}

// ==========================================
// PreferenceRepository
// ==========================================
pub struct PreferenceRepository {
    conn: Arc<Mutex<Connection>>,
}

impl PreferenceRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn insert(&self, pref: &Preference) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT INTO preference (preference_id, person_id, kind, template_id, pref_date, weight)
               VALUES (?, ?, ?, ?, ?, ?)"#,
            params![
                &pref.preference_id,
                &pref.person_id,
                pref.kind.to_db_str(),
                &pref.template_id,
                pref.date.map(fmt_date),
                pref.weight,
            ],
        )?;
        Ok(())
    }

    /// All preferences, ordered for deterministic context construction.
    pub fn list_all(&self) -> RepositoryResult<Vec<Preference>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT preference_id, person_id, kind, template_id, pref_date, weight
               FROM preference ORDER BY person_id, preference_id"#,
        )?;
        let prefs = stmt
            .query_map([], |row| {
                Ok(Preference {
                    preference_id: row.get(0)?,
                    person_id: row.get(1)?,
                    kind: get_enum(row, 2, PreferenceKind::from_str)?,
                    template_id: row.get(3)?,
                    date: get_opt_date(row, 4)?,
                    weight: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<Preference>, _>>()?;
        Ok(prefs)
    }
}
