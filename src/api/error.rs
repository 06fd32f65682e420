// ==========================================
// Residency Scheduler - API error type
// ==========================================
// Converts repository and engine errors into caller-facing errors.
// Every message states its reason; constraint failures keep the
// structured violation list.
// ==========================================

use crate::api::dto::ViolationDto;
use crate::engine::error::SchedulingError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // Request / business rule errors
    // ==========================================
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("business rule violated: {0}")]
    BusinessRuleViolation(String),

    /// A mutation whose post-state breaks a hard constraint
    #[error("hard constraint violated: {reason}")]
    ConstraintViolation {
        reason: String,
        violations: Vec<ViolationDto>,
    },

    #[error("no feasible schedule: {explanation}")]
    Infeasible {
        explanation: String,
        partial_count: usize,
        violations: Vec<ViolationDto>,
    },

    #[error("solver stopped early: {reason}")]
    SolverTimeout {
        reason: String,
        partial_count: usize,
        violations: Vec<ViolationDto>,
    },

    #[error("rollback window expired: {0}")]
    RollbackWindowExpired(String),

    // ==========================================
    // Concurrency
    // ==========================================
    /// Refetch and retry
    #[error("optimistic lock conflict: {0}")]
    OptimisticLockFailure(String),

    // ==========================================
    // Configuration / infrastructure
    // ==========================================
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("database connection failed: {0}")]
    DatabaseConnectionError(String),

    #[error("database transaction failed: {0}")]
    DatabaseTransactionError(String),

    #[error("internal error: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::OptimisticLockFailure(_))
    }

    /// Violations attached to constraint, infeasibility and timeout errors.
    pub fn violations(&self) -> &[ViolationDto] {
        match self {
            ApiError::ConstraintViolation { violations, .. }
            | ApiError::Infeasible { violations, .. }
            | ApiError::SolverTimeout { violations, .. } => violations,
            _ => &[],
        }
    }
}

// ==========================================
// From RepositoryError
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::OptimisticLockFailure {
                entity,
                id,
                expected,
                actual,
            } => ApiError::OptimisticLockFailure(format!(
                "{} {} was modified by another request (expected version {}, found {})",
                entity, id, expected, actual
            )),
            RepositoryError::StaleRecord { entity, id } => {
                ApiError::OptimisticLockFailure(format!("{} {} is no longer active", entity, id))
            }
            RepositoryError::NotFound { entity, id } => ApiError::NotFound(format!("{} (id={})", entity, id)),
            RepositoryError::DatabaseConnectionError(msg) => ApiError::DatabaseConnectionError(msg),
            RepositoryError::DatabaseTransactionError(msg) => ApiError::DatabaseTransactionError(msg),
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("database lock unavailable: {}", msg))
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("unique constraint: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("foreign key: {}", msg))
            }
            RepositoryError::ValidationError(msg) => ApiError::InvalidInput(msg),
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("field {}: {}", field, message))
            }
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

// ==========================================
// From SchedulingError
// ==========================================
impl From<SchedulingError> for ApiError {
    fn from(err: SchedulingError) -> Self {
        match err {
            SchedulingError::Validation(msg) => ApiError::InvalidInput(msg),
            SchedulingError::Infeasible {
                partial,
                violations,
                explanation,
            } => ApiError::Infeasible {
                explanation,
                partial_count: partial.len(),
                violations: violations.iter().map(ViolationDto::from).collect(),
            },
            SchedulingError::TimeoutAborted {
                partial,
                violations,
                reason,
            } => ApiError::SolverTimeout {
                reason,
                partial_count: partial.len(),
                violations: violations.iter().map(ViolationDto::from).collect(),
            },
            SchedulingError::ConcurrencyConflict(msg) => ApiError::OptimisticLockFailure(msg),
            SchedulingError::RollbackWindowExpired { swap_id, deadline } => {
                ApiError::RollbackWindowExpired(format!("swap {} could be rolled back until {}", swap_id, deadline))
            }
            SchedulingError::ConstraintConfig { problems } => ApiError::ConfigError(problems.join("; ")),
            e @ SchedulingError::HardConstraintViolation { .. } => {
                let violations = e.violations().iter().map(ViolationDto::from).collect();
                ApiError::ConstraintViolation {
                    reason: e.to_string(),
                    violations,
                }
            }
            SchedulingError::NotFound { entity, id } => ApiError::NotFound(format!("{} (id={})", entity, id)),
            SchedulingError::Repository(e) => ApiError::from(e),
            SchedulingError::ConfigSource(msg) => ApiError::ConfigError(msg),
            SchedulingError::Task(msg) => ApiError::InternalError(msg),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::constraints::{codes, Violation};

    #[test]
    fn test_repository_error_conversion() {
        let api_err: ApiError = RepositoryError::NotFound {
            entity: "Assignment".to_string(),
            id: "A1".to_string(),
        }
        .into();
        match api_err {
            ApiError::NotFound(msg) => {
                assert!(msg.contains("Assignment"));
                assert!(msg.contains("A1"));
            }
            other => panic!("expected NotFound, got {:?}", other),
        }

        let api_err: ApiError = RepositoryError::OptimisticLockFailure {
            entity: "Assignment".to_string(),
            id: "A1".to_string(),
            expected: 1,
            actual: 2,
        }
        .into();
        assert!(api_err.is_retryable());
        assert!(api_err.to_string().contains("expected version 1"));
    }

    #[test]
    fn test_scheduling_error_keeps_violations() {
        let err = SchedulingError::HardConstraintViolation {
            violations: vec![Violation::hard(codes::ABSENCE, 1.0, "R3 overlaps an absence")],
        };
        let api_err: ApiError = err.into();
        assert_eq!(api_err.violations().len(), 1);
        assert_eq!(api_err.violations()[0].constraint, codes::ABSENCE);
        assert!(!api_err.is_retryable());
    }

    #[test]
    fn test_concurrency_conflict_is_retryable() {
        let api_err: ApiError = SchedulingError::ConcurrencyConflict("A1 moved".to_string()).into();
        assert!(api_err.is_retryable());
    }
}
