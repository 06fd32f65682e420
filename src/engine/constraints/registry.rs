// ==========================================
// ConstraintRegistry - ordered constraint set shared by every solver
// ==========================================

use super::hard::{
    AbsenceConstraint, CoverageConstraint, DoubleBookingConstraint, EligibilityConstraint,
    RestDayConstraint, SupervisionConstraint, WorkHourConstraint,
};
use super::severity::classify_severity;
use super::soft::{ContinuityConstraint, FairnessConstraint, PreferenceConstraint, TemplateBalanceConstraint};
use super::{codes, Constraint, ScheduleView, Violation};
use crate::config::SchedulingPolicy;
use crate::domain::types::ConstraintKind;
use crate::engine::context::{Placement, SchedulingContext};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One evaluation of a candidate, reused for feasibility and scoring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryEvaluation {
    pub hard: Vec<Violation>,
    pub soft: Vec<Violation>,
    /// Weighted soft penalty
    pub penalty: f64,
    /// penalty - coverage_reward x placements (lower is better)
    pub objective: f64,
    pub penalty_by_constraint: BTreeMap<String, f64>,
}

impl RegistryEvaluation {
    pub fn is_feasible(&self) -> bool {
        self.hard.is_empty()
    }

    pub fn all_violations(&self) -> Vec<Violation> {
        self.hard.iter().chain(self.soft.iter()).cloned().collect()
    }
}

pub struct ConstraintRegistry {
    constraints: Vec<Box<dyn Constraint>>,
    coverage_reward: f64,
}

impl ConstraintRegistry {
    pub fn new(coverage_reward: f64) -> Self {
        Self {
            constraints: Vec::new(),
            coverage_reward,
        }
    }

    /// Every hard rule plus the soft goals weighted from policy.
    pub fn standard(policy: &SchedulingPolicy) -> Self {
        let w = &policy.weights;
        Self::new(w.coverage_reward)
            .register(Box::new(DoubleBookingConstraint))
            .register(Box::new(EligibilityConstraint))
            .register(Box::new(AbsenceConstraint))
            .register(Box::new(CoverageConstraint))
            .register(Box::new(SupervisionConstraint))
            .register(Box::new(WorkHourConstraint))
            .register(Box::new(RestDayConstraint))
            .register(Box::new(TemplateBalanceConstraint {
                weight: w.template_balance,
            }))
            .register(Box::new(PreferenceConstraint { weight: w.preference }))
            .register(Box::new(ContinuityConstraint { weight: w.continuity }))
            .register(Box::new(FairnessConstraint { weight: w.fairness }))
    }

    pub fn register(mut self, constraint: Box<dyn Constraint>) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn coverage_reward(&self) -> f64 {
        self.coverage_reward
    }

    /// Weight of a registered soft constraint (0 when absent).
    pub fn weight_of(&self, code: &str) -> f64 {
        self.constraints
            .iter()
            .filter(|c| c.kind() == ConstraintKind::Soft && c.code() == code)
            .map(|c| c.weight())
            .sum()
    }

    pub fn codes(&self) -> Vec<&'static str> {
        self.constraints.iter().map(|c| c.code()).collect()
    }

    pub fn evaluate(&self, ctx: &SchedulingContext, placements: &[Placement]) -> RegistryEvaluation {
        let view = ScheduleView::build(ctx, placements);
        let mut eval = RegistryEvaluation::default();

        for constraint in &self.constraints {
            let outcome = constraint.evaluate(ctx, &view);
            let mut violations = outcome.violations;
            for v in violations.iter_mut() {
                v.severity = classify_severity(v);
            }
            match constraint.kind() {
                ConstraintKind::Hard => eval.hard.extend(violations),
                ConstraintKind::Soft => {
                    let weighted = constraint.weight() * outcome.penalty;
                    eval.penalty += weighted;
                    *eval
                        .penalty_by_constraint
                        .entry(constraint.code().to_string())
                        .or_insert(0.0) += weighted;
                    eval.soft.extend(violations);
                }
            }
        }

        eval.objective = eval.penalty - self.coverage_reward * placements.len() as f64;
        eval
    }

    /// Hard violations only (swap validation, detection).
    pub fn hard_violations(&self, ctx: &SchedulingContext, placements: &[Placement]) -> Vec<Violation> {
        self.evaluate(ctx, placements).hard
    }

    /// Static reasons no schedule can exist: coverage floors that the
    /// available eligible people cannot meet, and PGY-1 floors on
    /// clinical templates no faculty can supervise.
    pub fn explain_infeasibility(&self, ctx: &SchedulingContext) -> Vec<String> {
        let has_coverage = self.codes().contains(&codes::COVERAGE);
        let has_supervision = self.codes().contains(&codes::SUPERVISION);
        let mut reasons = Vec::new();

        for (b, block) in ctx.blocks.iter().enumerate() {
            for (t, template) in ctx.templates.iter().enumerate() {
                if !template.allows_time(block.time_of_day) || template.min_residents == 0 {
                    continue;
                }
                let candidates: Vec<usize> = (0..ctx.people.len())
                    .filter(|&p| ctx.people[p].is_resident() && ctx.is_candidate(p, b, t))
                    .collect();

                if has_coverage && (candidates.len() as u32) < template.min_residents {
                    reasons.push(format!(
                        "{} on {} {} needs {} residents, {} eligible and available",
                        template.name,
                        block.date,
                        block.time_of_day,
                        template.min_residents,
                        candidates.len()
                    ));
                    continue;
                }

                if has_supervision && template.is_clinical() {
                    let seniors = candidates.iter().filter(|&&p| !ctx.people[p].is_intern()).count() as u32;
                    let needs_interns = template.min_residents.saturating_sub(seniors);
                    let faculty = (0..ctx.people.len())
                        .filter(|&p| ctx.people[p].is_faculty() && ctx.is_candidate(p, b, t))
                        .count() as u32;
                    let supervisable = faculty.min(template.faculty_capacity) * template.supervision_ratio;
                    if needs_interns > supervisable {
                        reasons.push(format!(
                            "{} on {} {} needs {} PGY-1 residents but available faculty supervise at most {}",
                            template.name, block.date, block.time_of_day, needs_interns, supervisable
                        ));
                    }
                }
            }
        }
        reasons
    }
}
