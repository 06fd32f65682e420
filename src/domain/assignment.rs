// ==========================================
// Residency Scheduler - Assignment
// ==========================================
// (Person, Block, RotationTemplate) triple.
// Created by a solve or a swap; changed only through the swap executor or
// the conflict resolver; superseded on change (never deleted).
// `version` is the optimistic-lock ETag.
// ==========================================

use crate::domain::types::AssignmentSource;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub assignment_id: String,
    pub person_id: String,
    pub block_id: String,
    pub template_id: String,

    // ===== explanation =====
    pub rationale: Option<String>,
    pub confidence: f64,

    // ===== lifecycle =====
    pub version: i32,
    pub active: bool,
    pub superseded_by: Option<String>,
    pub source: AssignmentSource,
    pub schedule_run_id: Option<String>,
    pub locked: bool,
    pub created_at: NaiveDateTime,
}

impl Assignment {
    /// New active assignment with version 1.
    pub fn new(
        person_id: impl Into<String>,
        block_id: impl Into<String>,
        template_id: impl Into<String>,
        source: AssignmentSource,
    ) -> Self {
        Self {
            assignment_id: uuid::Uuid::new_v4().to_string(),
            person_id: person_id.into(),
            block_id: block_id.into(),
            template_id: template_id.into(),
            rationale: None,
            confidence: 1.0,
            version: 1,
            active: true,
            superseded_by: None,
            source,
            schedule_run_id: None,
            locked: false,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>, confidence: f64) -> Self {
        self.rationale = Some(rationale.into());
        self.confidence = confidence;
        self
    }

    /// ETag as exposed to API callers.
    pub fn etag(&self) -> String {
        format!("{}:{}", self.assignment_id, self.version)
    }

    /// Same (person, block, template) placement, ignoring identity and lifecycle.
    pub fn same_placement(&self, other: &Assignment) -> bool {
        self.person_id == other.person_id
            && self.block_id == other.block_id
            && self.template_id == other.template_id
    }
}
