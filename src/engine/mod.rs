// ==========================================
// Residency Scheduler - Engine layer
// ==========================================
// Business rules only; SQL lives in the repository layer.
// Every decision carries a reason: violations name their constraint,
// runs record every solver attempt, swaps and fixes keep an audit record.
// ==========================================

pub mod conflict;
pub mod constraints;
pub mod context;
pub mod control;
pub mod error;
pub mod events;
pub mod generator;
pub mod jobs;
pub mod repositories;
pub mod solver;
pub mod swap;

#[cfg(test)]
pub(crate) mod fixtures;

pub use conflict::{ConflictDetector, ConflictReport, ConflictResolver, ResolutionOutcome, ResolutionStrategy};
pub use constraints::{codes, ConstraintRegistry, RegistryEvaluation, Violation};
pub use context::{ContextLoader, Placement, SchedulingContext};
pub use control::{CancellationToken, ProgressReporter, SolveMetrics, SolverControl, SolverProgress};
pub use error::{SchedulingError, SchedulingResult};
pub use events::{
    NoOpEventPublisher, OptionalEventPublisher, RecordingEventPublisher, ScheduleEvent,
    ScheduleEventPublisher, ScheduleEventType,
};
pub use generator::{GenerationOutcome, GenerationRequest, ScheduleGenerator};
pub use jobs::{GenerationJob, GenerationJobRunner};
pub use repositories::ScheduleRepositories;
pub use solver::{
    CpSatSolver, FallbackOrchestrator, GreedySolver, MilpSolver, PlannedAssignment, SolveResult, Solver,
};
pub use swap::{
    AssignmentLocks, SwapDecision, SwapExecutor, SwapOutcome, SwapRequest, SwapTarget, SwapValidation,
};
