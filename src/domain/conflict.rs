// ==========================================
// Residency Scheduler - ConflictRecord
// ==========================================

use crate::domain::types::{ConflictType, ResolutionStatus, Severity};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub conflict_id: String,
    /// Stable key: type + constraint + affected ids. Rescans upsert on it.
    pub fingerprint: String,
    pub conflict_type: ConflictType,
    pub severity: Severity,
    pub person_id: Option<String>,
    pub affected_assignment_ids: Vec<String>,
    pub description: String,
    pub detected_at: NaiveDateTime,
    pub resolution_status: ResolutionStatus,
    pub resolution_detail: Option<String>,
    pub swap_id: Option<String>,
}

impl ConflictRecord {
    pub fn is_open(&self) -> bool {
        self.resolution_status == ResolutionStatus::Open
    }
}
