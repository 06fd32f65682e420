// ==========================================
// Residency Scheduler - Core library
// ==========================================
// Builds half-day schedules for a residency program: who covers which
// rotation in each AM/PM block, within duty-hour ceilings, rest minimums,
// faculty supervision ratios and eligibility. Committed schedules stay
// editable through validated swaps with a rollback window, and a scanner
// reports and repairs whatever drifts out of policy.
// ==========================================

// ==========================================
// Modules
// ==========================================

// People, half-day blocks, rotation templates, assignments, swap and
// conflict records
pub mod domain;

// SQLite access; assignment writes are versioned and never delete rows
pub mod repository;

// Context snapshots, hard/soft constraint registry, greedy / cp_sat / milp
// backends, swap validation and execution, conflict scan and repair
pub mod engine;

// Duty-hour, rest and supervision policy with layered overrides
pub mod config;

// Connection pragmas and schema migrations
pub mod db;

// SQL statement counting and per-operation timing
pub mod perf;

// stderr subscriber, text or JSON lines
pub mod logging;

// Facades returning ApiError: schedule, swap, conflict, config
pub mod api;

// Shared connection, repositories and facades for one database file
pub mod app;

// ==========================================
// Re-exports
// ==========================================

pub use domain::types::{
    ActivityCategory, AssignmentSource, ConflictType, ConstraintKind, ResolutionStatus, Role, Severity,
    SolverStatus, SwapStatus, TimeOfDay,
};

pub use domain::{
    Absence, Assignment, Block, ConflictRecord, Person, Preference, RotationTemplate, ScheduleRun,
    SwapRecord,
};

pub use engine::{
    ConflictDetector, ConflictResolver, GenerationRequest, ScheduleGenerator, SchedulingError,
    SwapExecutor, SwapRequest, SwapTarget,
};

pub use api::{ApiError, ApiResult, ConfigApi, ConflictApi, ScheduleApi, SwapApi};

pub use app::AppState;

// ==========================================
// Constants
// ==========================================

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const APP_NAME: &str = "Residency Scheduler";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_identity() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
        assert_eq!(APP_NAME, "Residency Scheduler");
    }
}
