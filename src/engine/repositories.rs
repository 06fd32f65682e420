// ==========================================
// Residency Scheduler - Engine repository aggregate
// ==========================================
// Every repository the engine needs, sharing one connection so that
// multi-table writes can run in a single transaction.
// ==========================================

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::repository::{
    AbsenceRepository, AssignmentRepository, BlockRepository, ConflictRecordRepository,
    PersonRepository, PreferenceRepository, RepositoryError, RepositoryResult,
    RotationTemplateRepository, ScheduleRunRepository, SwapRecordRepository,
};

#[derive(Clone)]
pub struct ScheduleRepositories {
    pub person_repo: Arc<PersonRepository>,
    pub preference_repo: Arc<PreferenceRepository>,
    pub block_repo: Arc<BlockRepository>,
    pub template_repo: Arc<RotationTemplateRepository>,
    pub absence_repo: Arc<AbsenceRepository>,
    pub assignment_repo: Arc<AssignmentRepository>,
    pub run_repo: Arc<ScheduleRunRepository>,
    pub swap_repo: Arc<SwapRecordRepository>,
    pub conflict_repo: Arc<ConflictRecordRepository>,
    conn: Arc<Mutex<Connection>>,
}

impl ScheduleRepositories {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            person_repo: Arc::new(PersonRepository::new(conn.clone())),
            preference_repo: Arc::new(PreferenceRepository::new(conn.clone())),
            block_repo: Arc::new(BlockRepository::new(conn.clone())),
            template_repo: Arc::new(RotationTemplateRepository::new(conn.clone())),
            absence_repo: Arc::new(AbsenceRepository::new(conn.clone())),
            assignment_repo: Arc::new(AssignmentRepository::new(conn.clone())),
            run_repo: Arc::new(ScheduleRunRepository::new(conn.clone())),
            swap_repo: Arc::new(SwapRecordRepository::new(conn.clone())),
            conflict_repo: Arc::new(ConflictRecordRepository::new(conn.clone())),
            conn,
        }
    }

    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    /// Run `f` inside one transaction; commits on Ok, rolls back on Err.
    pub fn in_transaction<T, E>(&self, f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<RepositoryError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        let tx = conn.transaction().map_err(RepositoryError::from)?;
        let out = f(&tx)?;
        tx.commit().map_err(RepositoryError::from)?;
        Ok(out)
    }

    /// Read-only access to the shared connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> RepositoryResult<T>) -> RepositoryResult<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        f(&conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;

    #[test]
    fn test_failed_transaction_rolls_back() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let repos = ScheduleRepositories::new(Arc::new(Mutex::new(conn)));
        let start = chrono::NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();

        let result: Result<(), RepositoryError> = repos.in_transaction(|tx| {
            tx.execute(
                "INSERT INTO block (block_id, block_date, time_of_day) VALUES ('X-AM', '2026-03-02', 'AM')",
                [],
            )?;
            Err(RepositoryError::ValidationError("abort".to_string()))
        });
        assert!(result.is_err());
        assert!(repos.block_repo.list_in_range(start, start).unwrap().is_empty());
    }
}
