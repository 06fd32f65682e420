// ==========================================
// Residency Scheduler - Application layer
// ==========================================
// Service wiring for embedding callers and the CLI.
// ==========================================

pub mod state;

pub use state::{get_default_db_path, AppState, DB_PATH_ENV};
