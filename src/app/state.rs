// ==========================================
// Residency Scheduler - Application state
// ==========================================
// Opens the database, bootstraps the schema and wires repositories,
// engine services and API facades around one shared connection.
// ==========================================

use std::sync::{Arc, Mutex};

use crate::api::{ConfigApi, ConflictApi, ScheduleApi, SwapApi};
use crate::config::{ConfigManager, SchedulingConfigReader, SchedulingPolicy};
use crate::db::{init_schema, open_sqlite_connection};
use crate::engine::{
    AssignmentLocks, ConflictDetector, ConflictResolver, GenerationJobRunner, OptionalEventPublisher,
    ScheduleEventPublisher, ScheduleGenerator, ScheduleRepositories, SwapExecutor,
};

/// Environment variable overriding the default database location.
pub const DB_PATH_ENV: &str = "RESIDENCY_SCHEDULER_DB_PATH";

pub struct AppState {
    pub db_path: String,

    /// Policy the swap and conflict services were built with
    pub policy: SchedulingPolicy,

    pub repos: ScheduleRepositories,

    pub schedule_api: Arc<ScheduleApi>,
    pub swap_api: Arc<SwapApi>,
    pub conflict_api: Arc<ConflictApi>,
    pub config_api: Arc<ConfigApi>,
}

impl AppState {
    pub fn new(db_path: String) -> Result<Self, String> {
        Self::with_event_publisher(db_path, None)
    }

    /// Build every service.
    ///
    /// The policy is read once here; swap and conflict services keep it
    /// until the state is rebuilt. Generation re-reads it on every run.
    pub fn with_event_publisher(
        db_path: String,
        event_publisher: Option<Arc<dyn ScheduleEventPublisher>>,
    ) -> Result<Self, String> {
        tracing::info!(db_path = %db_path, "initialising application state");

        let conn = open_sqlite_connection(&db_path).map_err(|e| format!("cannot open database: {}", e))?;
        init_schema(&conn).map_err(|e| format!("schema bootstrap failed: {}", e))?;
        let conn = Arc::new(Mutex::new(conn));

        // ==========================================
        // Repositories / config
        // ==========================================
        let repos = ScheduleRepositories::new(conn.clone());
        let config_manager = Arc::new(
            ConfigManager::from_connection(conn.clone()).map_err(|e| format!("config manager: {}", e))?,
        );
        let policy = config_manager
            .read_policy()
            .map_err(|e| format!("cannot read policy: {}", e))?;
        policy
            .validate()
            .map_err(|problems| format!("stored policy is invalid: {}", problems.join("; ")))?;

        let events = match event_publisher {
            Some(publisher) => OptionalEventPublisher::with_publisher(publisher),
            None => OptionalEventPublisher::none(),
        };

        // ==========================================
        // Engine services
        // ==========================================
        let config_reader: Arc<dyn SchedulingConfigReader> = config_manager.clone();
        let generator =
            Arc::new(ScheduleGenerator::new(repos.clone(), config_reader).with_events(events.clone()));
        let jobs = Arc::new(GenerationJobRunner::new(generator.clone()));

        let executor = Arc::new(
            SwapExecutor::new(repos.clone(), policy.clone(), AssignmentLocks::new()).with_events(events.clone()),
        );
        let detector =
            Arc::new(ConflictDetector::new(repos.clone(), policy.clone()).with_events(events.clone()));
        let resolver = Arc::new(ConflictResolver::new(repos.clone(), executor.clone()).with_events(events));

        // ==========================================
        // APIs
        // ==========================================
        let schedule_api = Arc::new(ScheduleApi::new(repos.clone(), generator, jobs));
        let swap_api = Arc::new(SwapApi::new(executor));
        let conflict_api = Arc::new(ConflictApi::new(repos.clone(), detector, resolver));
        let config_api = Arc::new(ConfigApi::new(conn, config_manager));

        tracing::info!("application state ready");

        Ok(Self {
            db_path,
            policy,
            repos,
            schedule_api,
            swap_api,
            conflict_api,
            config_api,
        })
    }

    pub fn get_db_path(&self) -> &str {
        &self.db_path
    }
}

// ==========================================
// Default database path
// ==========================================

/// `$RESIDENCY_SCHEDULER_DB_PATH` when set, otherwise
/// `<data dir>/residency-scheduler/residency_scheduler.db`
/// (falls back to the working directory).
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./residency_scheduler.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("residency-scheduler");
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("residency_scheduler.db");
        }
    }
    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_default_db_path() {
        let path = get_default_db_path();
        assert!(!path.is_empty());
        assert!(path.ends_with(".db"));
    }

    #[test]
    fn test_new_bootstraps_fresh_database() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.db").to_string_lossy().to_string();

        let state = AppState::new(db_path.clone()).unwrap();
        assert_eq!(state.get_db_path(), db_path);
        assert_eq!(state.policy, SchedulingPolicy::default());
        assert!(state.config_api.list_configs().unwrap().is_empty());

        // reopening an initialised file is fine
        drop(state);
        assert!(AppState::new(db_path).is_ok());
    }
}
