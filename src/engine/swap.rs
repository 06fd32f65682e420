// ==========================================
// Residency Scheduler - Swap executor
// ==========================================
// validate (read-only, full post-state) -> lock affected assignments ->
// one transaction superseding old rows, inserting new rows and the
// SwapRecord. Rollback is a dedicated operation inside the rollback
// window and re-validates the reverted state (fail closed).
// ==========================================

mod executor;
mod locks;
mod validator;

#[cfg(test)]
mod tests;

pub use executor::{SwapExecutor, SwapOutcome};
pub use locks::{AssignmentLockGuard, AssignmentLocks};
pub use validator::{PlannedChange, SwapPlan, SwapValidation, SwapValidator};

use crate::engine::constraints::Violation;
use crate::engine::error::{SchedulingError, SchedulingResult};
use serde::{Deserialize, Serialize};

/// What the source assignment is swapped against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SwapTarget {
    /// Trade people with another assignment
    Exchange {
        assignment_id: String,
        expected_version: i32,
    },
    /// Same person, different slot
    MoveTo { block_id: String, template_id: String },
    /// Same slot, different person
    HandOff { person_id: String },
}

impl SwapTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            SwapTarget::Exchange { .. } => "exchange",
            SwapTarget::MoveTo { .. } => "move",
            SwapTarget::HandOff { .. } => "hand_off",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapRequest {
    pub source_assignment_id: String,
    /// Version (ETag) the caller validated against
    pub expected_version: i32,
    pub target: SwapTarget,
    pub idempotency_key: String,
    pub actor: String,
}

impl SwapRequest {
    pub fn validate(&self) -> SchedulingResult<()> {
        if self.idempotency_key.trim().is_empty() {
            return Err(SchedulingError::Validation("idempotency key is required".to_string()));
        }
        if self.actor.trim().is_empty() {
            return Err(SchedulingError::Validation("actor is required".to_string()));
        }
        if self.source_assignment_id.trim().is_empty() {
            return Err(SchedulingError::Validation("source assignment is required".to_string()));
        }
        Ok(())
    }

    pub fn target_json(&self) -> SchedulingResult<String> {
        serde_json::to_string(&self.target).map_err(|e| SchedulingError::Validation(e.to_string()))
    }
}

/// Outcome of validating a projected post-swap schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapDecision {
    Allowed,
    Blocked { reasons: Vec<Violation> },
    AllowedWithWarnings { warnings: Vec<Violation> },
}

impl SwapDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, SwapDecision::Blocked { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            SwapDecision::Allowed => "ALLOWED",
            SwapDecision::Blocked { .. } => "BLOCKED",
            SwapDecision::AllowedWithWarnings { .. } => "ALLOWED_WITH_WARNINGS",
        }
    }

    /// Constraint codes behind a BLOCKED decision, deduplicated.
    pub fn blocked_codes(&self) -> Vec<String> {
        let SwapDecision::Blocked { reasons } = self else {
            return Vec::new();
        };
        let mut codes: Vec<String> = reasons.iter().map(|v| v.constraint.clone()).collect();
        codes.sort();
        codes.dedup();
        codes
    }

    /// Decision as stored on a SwapRecord; warning details stay on the record.
    pub fn from_label(label: &str) -> Self {
        match label {
            "ALLOWED_WITH_WARNINGS" => SwapDecision::AllowedWithWarnings { warnings: Vec::new() },
            _ => SwapDecision::Allowed,
        }
    }
}
