// ==========================================
// Residency Scheduler - ScheduleRun audit record
// ==========================================
// Immutable record of one solve: which backend produced the result and,
// on fallback, why every earlier backend failed.

use crate::domain::types::SolverStatus;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// One backend attempt inside the fallback chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverAttempt {
    pub solver_name: String,
    pub status: SolverStatus,
    pub objective_score: Option<f64>,
    pub elapsed_ms: u64,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRun {
    pub run_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub solver_used: String,
    pub status: SolverStatus,
    pub objective_score: f64,
    pub seed: u64,
    pub assignment_count: usize,
    pub violations_json: String,       // serialized Vec<Violation>
    pub attempts: Vec<SolverAttempt>,  // in chain order
    pub fallback_reason: Option<String>,
    pub metrics_json: Option<String>,  // profiling output
    pub config_snapshot_json: Option<String>,
    pub committed: bool,
    pub created_at: NaiveDateTime,
}

impl ScheduleRun {
    /// Reasons of all failed attempts, joined in chain order.
    pub fn failure_summary(&self) -> Option<String> {
        let reasons: Vec<String> = self
            .attempts
            .iter()
            .filter_map(|a| {
                a.failure_reason
                    .as_ref()
                    .map(|r| format!("{}: {}", a.solver_name, r))
            })
            .collect();
        if reasons.is_empty() {
            None
        } else {
            Some(reasons.join("; "))
        }
    }
}
