// ==========================================
// Residency Scheduler - Domain layer
// ==========================================
// Entities and value types. No persistence, no engine logic.
// ==========================================

pub mod assignment;
pub mod block;
pub mod conflict;
pub mod person;
pub mod rotation;
pub mod schedule_run;
pub mod swap;
pub mod types;

pub use assignment::Assignment;
pub use block::Block;
pub use conflict::ConflictRecord;
pub use person::{Absence, Person, Preference};
pub use rotation::RotationTemplate;
pub use schedule_run::{ScheduleRun, SolverAttempt};
pub use swap::{SupersededPair, SwapRecord};
pub use types::{
    ActivityCategory, AssignmentSource, ConflictType, ConstraintKind, PreferenceKind,
    ResolutionStatus, Role, Severity, SolverStatus, SwapStatus, TimeOfDay,
};
