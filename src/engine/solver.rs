// ==========================================
// Residency Scheduler - Solvers
// ==========================================
// Common contract: solve(problem, budget, seed, control) -> SolveResult.
// Backends: greedy, cp_sat (propagating search + seeded LNS),
// milp (branch and bound). All consume the same AssignmentModel and
// the registry objective, so the template-balance term is identical.
// ==========================================

mod cp_sat;
mod fallback;
mod greedy;
mod milp;
mod model;

#[cfg(test)]
mod tests;

pub use cp_sat::CpSatSolver;
pub use fallback::{FallbackOrchestrator, FallbackOutcome};
pub use greedy::GreedySolver;
pub use milp::MilpSolver;
pub use model::{AssignmentModel, ModelState, Origin, Seat, Var};

use crate::config::SchedulingPolicy;
use crate::domain::types::SolverStatus;
use crate::engine::constraints::{ConstraintRegistry, Violation};
use crate::engine::context::{Placement, SchedulingContext};
use crate::engine::control::SolverControl;
use crate::engine::error::{SchedulingError, SchedulingResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Everything a backend needs for one solve.
pub struct Problem<'a> {
    pub ctx: &'a SchedulingContext,
    pub registry: &'a ConstraintRegistry,
    pub model: &'a AssignmentModel,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolveBudget {
    /// Wall-clock safety net
    pub time_budget: Duration,
    /// Deterministic work limit (search nodes)
    pub node_limit: u64,
}

impl SolveBudget {
    pub fn from_policy(policy: &SchedulingPolicy) -> Self {
        Self {
            time_budget: Duration::from_millis(policy.solver.time_budget_ms),
            node_limit: policy.solver.node_limit,
        }
    }
}

/// One solver-produced assignment, keyed by ids (no generated ids, so
/// identical inputs give identical output).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAssignment {
    pub person_id: String,
    pub block_id: String,
    pub template_id: String,
    pub rationale: String,
    pub confidence: f64,
    /// Locked input kept as is
    pub fixed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveResult {
    pub solver_name: String,
    pub status: SolverStatus,
    pub assignments: Vec<PlannedAssignment>,
    #[serde(skip)]
    pub placements: Vec<Placement>,
    pub objective_score: f64,
    pub violations: Vec<Violation>,
    pub nodes: u64,
    /// Why the solver stopped or failed
    pub message: Option<String>,
}

impl SolveResult {
    /// Evaluate the final state against the registry and package it.
    pub fn from_state(
        problem: &Problem<'_>,
        solver_name: &str,
        status: SolverStatus,
        state: &ModelState<'_>,
        nodes: u64,
        message: Option<String>,
    ) -> Self {
        let ctx = problem.ctx;
        let mut annotated: Vec<(Placement, Origin)> = state.annotated_placements();
        annotated.sort_by_key(|(p, _)| (p.block, p.template, p.person));

        let placements: Vec<Placement> = annotated.iter().map(|(p, _)| *p).collect();
        let eval = problem.registry.evaluate(ctx, &placements);

        let assignments = annotated
            .iter()
            .map(|(p, origin)| PlannedAssignment {
                person_id: ctx.people[p.person].person_id.clone(),
                block_id: ctx.blocks[p.block].block_id.clone(),
                template_id: ctx.templates[p.template].template_id.clone(),
                rationale: format!("{}: {}", solver_name, origin.describe()),
                confidence: origin.confidence(),
                fixed: *origin == Origin::Locked,
            })
            .collect();

        Self {
            solver_name: solver_name.to_string(),
            status,
            assignments,
            placements,
            objective_score: eval.objective,
            violations: eval.all_violations(),
            nodes,
            message,
        }
    }

    /// Result with no usable assignments (errors, stubs).
    pub fn empty(solver_name: &str, status: SolverStatus, message: impl Into<String>) -> Self {
        Self {
            solver_name: solver_name.to_string(),
            status,
            assignments: Vec::new(),
            placements: Vec::new(),
            objective_score: 0.0,
            violations: Vec::new(),
            nodes: 0,
            message: Some(message.into()),
        }
    }

    pub fn hard_violations(&self) -> Vec<&Violation> {
        self.violations.iter().filter(|v| v.is_hard()).collect()
    }

    /// (person, block, template) keys, sorted; for reproducibility checks.
    pub fn assignment_keys(&self) -> Vec<(String, String, String)> {
        let mut keys: Vec<_> = self
            .assignments
            .iter()
            .map(|a| (a.person_id.clone(), a.block_id.clone(), a.template_id.clone()))
            .collect();
        keys.sort();
        keys
    }
}

/// A scheduling backend.
pub trait Solver: Send + Sync {
    fn name(&self) -> &'static str;

    fn solve(
        &self,
        problem: &Problem<'_>,
        budget: &SolveBudget,
        seed: u64,
        control: &SolverControl,
    ) -> SchedulingResult<SolveResult>;
}

pub fn solver_by_name(name: &str) -> Option<Arc<dyn Solver>> {
    match name {
        "greedy" => Some(Arc::new(GreedySolver::new())),
        "cp_sat" => Some(Arc::new(CpSatSolver::new())),
        "milp" => Some(Arc::new(MilpSolver::new())),
        _ => None,
    }
}

/// Backends in fallback order.
pub fn build_chain(order: &[String]) -> SchedulingResult<Vec<Arc<dyn Solver>>> {
    order
        .iter()
        .map(|name| {
            solver_by_name(name).ok_or_else(|| {
                SchedulingError::Validation(format!("unknown solver backend '{}'", name))
            })
        })
        .collect()
}
