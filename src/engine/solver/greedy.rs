// ==========================================
// GreedySolver - deterministic single pass
// ==========================================
// 1. Required seats, scarcest first, cheapest candidate each
// 2. Remaining idle people block by block, least loaded first
// No backtracking: a seat nobody can take stays empty and the result
// is INFEASIBLE with the partial schedule attached.
// ==========================================

use super::model::ModelState;
use super::{Problem, SolveBudget, SolveResult, Solver};
use crate::domain::types::SolverStatus;
use crate::engine::control::{SearchMonitor, SolverControl, StopReason};
use crate::engine::error::SchedulingResult;
use tracing::instrument;

#[derive(Debug, Default)]
pub struct GreedySolver;

impl GreedySolver {
    pub fn new() -> Self {
        Self
    }
}

impl Solver for GreedySolver {
    fn name(&self) -> &'static str {
        "greedy"
    }

    #[instrument(skip_all, fields(solver = "greedy"))]
    fn solve(
        &self,
        problem: &Problem<'_>,
        budget: &SolveBudget,
        _seed: u64,
        control: &SolverControl,
    ) -> SchedulingResult<SolveResult> {
        let ctx = problem.ctx;
        let model = problem.model;
        let mut monitor = SearchMonitor::new(control, budget, self.name());
        let mut state = ModelState::new(ctx, model);

        let seats = model.required_seats(ctx);
        let all_blocks: Vec<usize> = (0..ctx.blocks.len()).collect();

        let outcome = state
            .fill_seats(&seats, &mut monitor, None)
            .and_then(|unfilled| {
                state.fill_idle(&all_blocks, &mut monitor, None)?;
                Ok(unfilled)
            });
        monitor.finish(Some(state.objective()));

        let (status, message) = match outcome {
            Err(StopReason::Cancelled) => (SolverStatus::Aborted, Some(StopReason::Cancelled.describe(budget))),
            Err(reason) => (SolverStatus::Timeout, Some(reason.describe(budget))),
            Ok(unfilled) if unfilled.is_empty() => (SolverStatus::Feasible, None),
            Ok(unfilled) => (
                SolverStatus::Infeasible,
                Some(format!("{} required seats could not be filled", unfilled.len())),
            ),
        };

        let mut result = SolveResult::from_state(problem, self.name(), status, &state, monitor.nodes(), message);
        if result.status == SolverStatus::Feasible && !result.hard_violations().is_empty() {
            result.status = SolverStatus::Infeasible;
            result.message = Some(format!(
                "{} hard violations remain after the greedy pass",
                result.hard_violations().len()
            ));
        }

        tracing::info!(
            status = %result.status,
            assignments = result.assignments.len(),
            objective = result.objective_score,
            nodes = result.nodes,
            "greedy pass finished"
        );
        Ok(result)
    }
}
