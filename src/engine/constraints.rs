// ==========================================
// Residency Scheduler - Constraint system
// ==========================================
// Constraints are data: (code, kind, weight, evaluator) held in an
// ordered registry. One evaluation of a candidate feeds both hard
// feasibility and the soft objective.
// ==========================================

mod hard;
mod registry;
mod severity;
mod soft;
mod view;


pub use hard::{
    AbsenceConstraint, CoverageConstraint, DoubleBookingConstraint, EligibilityConstraint,
    RestDayConstraint, SupervisionConstraint, WorkHourConstraint,
};
pub(crate) use hard::rolling_windows;
pub use registry::{ConstraintRegistry, RegistryEvaluation};
pub use severity::classify_severity;
pub use soft::{
    continuity_cost, preference_cost, squared_deviation, squared_deviation_delta,
    ContinuityConstraint, FairnessConstraint, PreferenceConstraint, TemplateBalanceConstraint,
};
pub use view::{Cell, ScheduleView};

use crate::domain::types::{ConstraintKind, Severity};
use crate::engine::context::SchedulingContext;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Constraint codes, as reported in violations and BLOCKED reasons.
pub mod codes {
    pub const DOUBLE_BOOKING: &str = "DOUBLE_BOOKING";
    pub const COVERAGE: &str = "COVERAGE";
    pub const CAPACITY: &str = "CAPACITY";
    pub const SUPERVISION: &str = "SUPERVISION";
    pub const WORK_HOUR_VIOLATION: &str = "WORK_HOUR_VIOLATION";
    pub const REST_VIOLATION: &str = "REST_VIOLATION";
    pub const ELIGIBILITY: &str = "ELIGIBILITY";
    pub const ABSENCE: &str = "ABSENCE";

    pub const TEMPLATE_BALANCE: &str = "TEMPLATE_BALANCE";
    pub const PREFERENCE: &str = "PREFERENCE";
    pub const CONTINUITY: &str = "CONTINUITY";
    pub const FAIRNESS: &str = "FAIRNESS";
}

// ==========================================
// Violation
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub constraint: String,
    pub kind: ConstraintKind,
    pub severity: Severity,
    pub person_id: Option<String>,
    pub block_id: Option<String>,
    pub template_id: Option<String>,
    pub date: Option<NaiveDate>,
    /// Amount over (or under) the threshold
    pub magnitude: f64,
    /// Threshold the magnitude is measured against (0 when not applicable)
    pub limit: f64,
    pub message: String,
    /// Indices into the evaluated placement slice
    #[serde(default)]
    pub placements: Vec<usize>,
}

impl Violation {
    pub fn new(constraint: &str, kind: ConstraintKind, magnitude: f64, message: impl Into<String>) -> Self {
        Self {
            constraint: constraint.to_string(),
            kind,
            severity: Severity::Low,
            person_id: None,
            block_id: None,
            template_id: None,
            date: None,
            magnitude,
            limit: 0.0,
            message: message.into(),
            placements: Vec::new(),
        }
    }

    pub fn hard(constraint: &str, magnitude: f64, message: impl Into<String>) -> Self {
        Self::new(constraint, ConstraintKind::Hard, magnitude, message)
    }

    pub fn soft(constraint: &str, magnitude: f64, message: impl Into<String>) -> Self {
        Self::new(constraint, ConstraintKind::Soft, magnitude, message)
    }

    pub fn person(mut self, ctx: &SchedulingContext, person: usize) -> Self {
        self.person_id = Some(ctx.people[person].person_id.clone());
        self
    }

    pub fn block(mut self, ctx: &SchedulingContext, block: usize) -> Self {
        self.block_id = Some(ctx.blocks[block].block_id.clone());
        self.date = Some(ctx.blocks[block].date);
        self
    }

    pub fn template(mut self, ctx: &SchedulingContext, template: usize) -> Self {
        self.template_id = Some(ctx.templates[template].template_id.clone());
        self
    }

    pub fn on(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn limit(mut self, limit: f64) -> Self {
        self.limit = limit;
        self
    }

    pub fn placements(mut self, placements: Vec<usize>) -> Self {
        self.placements = placements;
        self
    }

    /// Identity ignoring magnitude and placement indices.
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.constraint,
            self.person_id.as_deref().unwrap_or("-"),
            self.block_id.as_deref().unwrap_or("-"),
            self.template_id.as_deref().unwrap_or("-"),
            self.date.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())
        )
    }

    pub fn is_hard(&self) -> bool {
        self.kind == ConstraintKind::Hard
    }
}

/// Result of one constraint over one candidate.
#[derive(Debug, Clone, Default)]
pub struct ConstraintOutcome {
    pub violations: Vec<Violation>,
    /// Unweighted penalty (soft constraints only)
    pub penalty: f64,
}

/// A hard rule or weighted soft goal.
pub trait Constraint: Send + Sync {
    fn code(&self) -> &'static str;

    fn kind(&self) -> ConstraintKind;

    /// Objective weight; ignored for hard constraints.
    fn weight(&self) -> f64 {
        0.0
    }

    fn evaluate(&self, ctx: &SchedulingContext, view: &ScheduleView) -> ConstraintOutcome;
}
