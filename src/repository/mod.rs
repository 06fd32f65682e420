// ==========================================
// Residency Scheduler - Repository layer
// ==========================================
// Data access only; no business logic.
// All queries are parameterised.
// ==========================================

pub mod absence_repo;
pub mod assignment_repo;
pub mod block_repo;
pub mod conflict_repo;
pub mod error;
pub mod person_repo;
pub mod rotation_repo;
pub mod row_utils;
pub mod schedule_run_repo;
pub mod swap_repo;

pub use absence_repo::AbsenceRepository;
pub use assignment_repo::AssignmentRepository;
pub use block_repo::BlockRepository;
pub use conflict_repo::ConflictRecordRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use person_repo::{PersonRepository, PreferenceRepository};
pub use rotation_repo::RotationTemplateRepository;
pub use schedule_run_repo::ScheduleRunRepository;
pub use swap_repo::SwapRecordRepository;
