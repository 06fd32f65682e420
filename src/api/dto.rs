// ==========================================
// Residency Scheduler - API transfer objects
// ==========================================
// Serializable views returned to callers. Engine types stay internal.
// ==========================================

use crate::domain::assignment::Assignment;
use crate::domain::schedule_run::ScheduleRun;
use crate::domain::swap::SwapRecord;
use crate::domain::types::{ConstraintKind, Severity, SolverStatus};
use crate::engine::constraints::Violation;
use crate::engine::control::SolveMetrics;
use crate::engine::generator::GenerationOutcome;
use crate::engine::swap::{SwapDecision, SwapOutcome, SwapValidation};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationDto {
    pub constraint: String,
    pub kind: ConstraintKind,
    pub severity: Severity,
    pub person_id: Option<String>,
    pub block_id: Option<String>,
    pub template_id: Option<String>,
    pub date: Option<NaiveDate>,
    pub magnitude: f64,
    pub limit: f64,
    pub message: String,
}

impl From<&Violation> for ViolationDto {
    fn from(v: &Violation) -> Self {
        Self {
            constraint: v.constraint.clone(),
            kind: v.kind,
            severity: v.severity,
            person_id: v.person_id.clone(),
            block_id: v.block_id.clone(),
            template_id: v.template_id.clone(),
            date: v.date,
            magnitude: v.magnitude,
            limit: v.limit,
            message: v.message.clone(),
        }
    }
}

/// Assignment plus its ETag for optimistic concurrency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentDto {
    pub assignment_id: String,
    pub person_id: String,
    pub block_id: String,
    pub template_id: String,
    pub rationale: Option<String>,
    pub confidence: f64,
    pub version: i32,
    pub etag: String,
    pub locked: bool,
    pub source: String,
}

impl From<&Assignment> for AssignmentDto {
    fn from(a: &Assignment) -> Self {
        Self {
            assignment_id: a.assignment_id.clone(),
            person_id: a.person_id.clone(),
            block_id: a.block_id.clone(),
            template_id: a.template_id.clone(),
            rationale: a.rationale.clone(),
            confidence: a.confidence,
            version: a.version,
            etag: a.etag(),
            locked: a.locked,
            source: a.source.to_db_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub run_id: String,
    pub status: SolverStatus,
    pub solver_used: String,
    pub objective_score: f64,
    pub assignment_count: usize,
    pub committed: bool,
    pub superseded: usize,
    /// Why earlier backends in the chain were skipped
    pub fallback_reason: Option<String>,
    pub violations: Vec<ViolationDto>,
    pub metrics: SolveMetrics,
}

impl From<&GenerationOutcome> for GenerateResponse {
    fn from(outcome: &GenerationOutcome) -> Self {
        Self {
            run_id: outcome.run.run_id.clone(),
            status: outcome.result.status,
            solver_used: outcome.run.solver_used.clone(),
            objective_score: outcome.result.objective_score,
            assignment_count: outcome.result.assignments.len(),
            committed: outcome.committed,
            superseded: outcome.superseded,
            fallback_reason: outcome.run.fallback_reason.clone(),
            violations: outcome.result.violations.iter().map(ViolationDto::from).collect(),
            metrics: outcome.metrics.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: SolverStatus,
    pub solver_used: String,
    pub objective_score: f64,
    pub assignment_count: usize,
    pub committed: bool,
    pub failure_summary: Option<String>,
}

impl From<&ScheduleRun> for RunSummary {
    fn from(run: &ScheduleRun) -> Self {
        Self {
            run_id: run.run_id.clone(),
            start_date: run.start_date,
            end_date: run.end_date,
            status: run.status,
            solver_used: run.solver_used.clone(),
            objective_score: run.objective_score,
            assignment_count: run.assignment_count,
            committed: run.committed,
            failure_summary: run.failure_summary(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapValidationResponse {
    pub decision: String,
    pub allowed: bool,
    pub blocking: Vec<ViolationDto>,
    pub warnings: Vec<ViolationDto>,
}

impl From<&SwapValidation> for SwapValidationResponse {
    fn from(validation: &SwapValidation) -> Self {
        decision_view(&validation.decision)
    }
}

fn decision_view(decision: &SwapDecision) -> SwapValidationResponse {
    let (blocking, warnings) = match decision {
        SwapDecision::Allowed => (Vec::new(), Vec::new()),
        SwapDecision::AllowedWithWarnings { warnings } => (Vec::new(), warnings.clone()),
        SwapDecision::Blocked { reasons } => (reasons.clone(), Vec::new()),
    };
    SwapValidationResponse {
        decision: decision.label().to_string(),
        allowed: decision.is_allowed(),
        blocking: blocking.iter().map(ViolationDto::from).collect(),
        warnings: warnings.iter().map(ViolationDto::from).collect(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapResponse {
    pub executed: bool,
    pub replayed: bool,
    pub validation: SwapValidationResponse,
    pub record: Option<SwapRecord>,
    pub new_assignment_ids: Vec<String>,
}

impl From<&SwapOutcome> for SwapResponse {
    fn from(outcome: &SwapOutcome) -> Self {
        Self {
            executed: outcome.executed(),
            replayed: outcome.replayed,
            validation: decision_view(&outcome.decision),
            record: outcome.record.clone(),
            new_assignment_ids: outcome.new_assignment_ids.clone(),
        }
    }
}
