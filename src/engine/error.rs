// ==========================================
// Residency Scheduler - Engine error taxonomy
// ==========================================
// Infeasible / TimeoutAborted carry the partial result and the
// structured violation list instead of a bare failure.
// Only ConcurrencyConflict is retryable (after refetching state).
// ==========================================

use crate::engine::constraints::Violation;
use crate::engine::solver::PlannedAssignment;
use crate::repository::error::RepositoryError;
use chrono::NaiveDateTime;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulingError {
    /// Malformed request
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("no schedule satisfies every hard constraint: {explanation}")]
    Infeasible {
        partial: Vec<PlannedAssignment>,
        violations: Vec<Violation>,
        explanation: String,
    },

    #[error("solver stopped before a valid schedule was found ({reason}); {} partial assignments attached", partial.len())]
    TimeoutAborted {
        partial: Vec<PlannedAssignment>,
        violations: Vec<Violation>,
        reason: String,
    },

    /// Optimistic-lock mismatch; refetch and retry
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("rollback window expired for swap {swap_id} (deadline {deadline})")]
    RollbackWindowExpired {
        swap_id: String,
        deadline: NaiveDateTime,
    },

    /// Contradictory or out-of-range policy values
    #[error("constraint configuration invalid: {}", problems.join("; "))]
    ConstraintConfig { problems: Vec<String> },

    /// A mutation whose post-state would break a hard constraint
    #[error("hard constraint violated: {}", summarize(violations))]
    HardConstraintViolation { violations: Vec<Violation> },

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error(transparent)]
    Repository(RepositoryError),

    #[error("configuration source failed: {0}")]
    ConfigSource(String),

    #[error("background task failed: {0}")]
    Task(String),
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}: {}", v.constraint, v.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl SchedulingError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SchedulingError::ConcurrencyConflict(_))
    }

    /// Partial result attached to Infeasible / TimeoutAborted.
    pub fn partial(&self) -> Option<&[PlannedAssignment]> {
        match self {
            SchedulingError::Infeasible { partial, .. }
            | SchedulingError::TimeoutAborted { partial, .. } => Some(partial),
            _ => None,
        }
    }

    pub fn violations(&self) -> &[Violation] {
        match self {
            SchedulingError::Infeasible { violations, .. }
            | SchedulingError::TimeoutAborted { violations, .. }
            | SchedulingError::HardConstraintViolation { violations } => violations,
            _ => &[],
        }
    }
}

impl From<RepositoryError> for SchedulingError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => SchedulingError::NotFound { entity, id },
            e if e.is_concurrency_conflict() => SchedulingError::ConcurrencyConflict(e.to_string()),
            e => SchedulingError::Repository(e),
        }
    }
}

pub type SchedulingResult<T> = Result<T, SchedulingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_failure_maps_to_retryable_conflict() {
        let err: SchedulingError = RepositoryError::OptimisticLockFailure {
            entity: "Assignment".to_string(),
            id: "A1".to_string(),
            expected: 1,
            actual: 3,
        }
        .into();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("A1"));
    }

    #[test]
    fn test_other_errors_are_terminal() {
        let err: SchedulingError = RepositoryError::DatabaseQueryError("disk I/O".into()).into();
        assert!(!err.is_retryable());
        assert!(!SchedulingError::Validation("bad range".into()).is_retryable());
        assert!(err.partial().is_none());
    }

    #[test]
    fn test_not_found_is_preserved() {
        let err: SchedulingError = RepositoryError::NotFound {
            entity: "SwapRecord".to_string(),
            id: "S1".to_string(),
        }
        .into();
        assert!(matches!(err, SchedulingError::NotFound { .. }));
    }
}
