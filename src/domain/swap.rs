// ==========================================
// Residency Scheduler - SwapRecord audit record
// ==========================================

use crate::domain::types::SwapStatus;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Old assignment superseded by new assignment (either side may be absent
/// for pure additions/removals done by the conflict resolver).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupersededPair {
    pub old_assignment_id: Option<String>,
    pub new_assignment_id: Option<String>,
    /// Version of the superseded row right after the swap
    #[serde(default)]
    pub old_version: Option<i32>,
    /// Version the new row was inserted with
    #[serde(default)]
    pub new_version: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapRecord {
    pub swap_id: String,
    pub idempotency_key: String,
    pub source_assignment_id: String,
    pub target_json: String, // serialized SwapTarget
    pub person_ids: Vec<String>, // everyone whose schedule changed
    pub changes: Vec<SupersededPair>,
    pub decision: String,        // ALLOWED / ALLOWED_WITH_WARNINGS
    pub warnings: Vec<String>,   // soft violations accepted at execution
    pub status: SwapStatus,
    pub executed_at: NaiveDateTime,
    pub rollback_deadline: NaiveDateTime,
    pub rolled_back_at: Option<NaiveDateTime>,
    pub actor: String,
}

impl SwapRecord {
    pub fn involves(&self, person_id: &str) -> bool {
        self.person_ids.iter().any(|p| p == person_id)
    }

    pub fn can_rollback_at(&self, now: NaiveDateTime) -> bool {
        self.status == SwapStatus::Executed && now <= self.rollback_deadline
    }
}
