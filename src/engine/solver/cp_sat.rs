// ==========================================
// CpSatSolver - propagating search plus seeded large neighbourhood search
// ==========================================
// Phase 1: depth-first search over required seats with backtracking and
//          a same-block forward check (no later seat left without support)
// Phase 2: shared idle fill
// Phase 3: LNS. Free one random day, repair it with seeded noise, keep
//          the repair only if the objective improves
// Same seed + same model => same result unless the wall clock cuts in.
// ==========================================

use super::model::{ModelState, Origin, Seat};
use super::{Problem, SolveBudget, SolveResult, Solver};
use crate::domain::types::SolverStatus;
use crate::engine::constraints::codes;
use crate::engine::control::{SearchMonitor, SolverControl, StopReason};
use crate::engine::error::SchedulingResult;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use tracing::instrument;

/// LNS rounds per scheduled day.
const LNS_ROUNDS_PER_DAY: usize = 2;

const IMPROVEMENT_EPS: f64 = 1e-9;

#[derive(Debug, Default)]
pub struct CpSatSolver;

impl CpSatSolver {
    pub fn new() -> Self {
        Self
    }
}

struct Frame {
    options: Vec<usize>,
    next: usize,
    applied: Vec<usize>,
    /// Seat already met when the frame was opened
    skip: bool,
}

enum SeatSearch {
    Solved,
    Exhausted,
    Stopped(StopReason),
}

fn seat_origin(seat: &Seat) -> Origin {
    if seat.faculty {
        Origin::Supervision
    } else {
        Origin::Coverage
    }
}

fn open_frame(state: &ModelState<'_>, seat: &Seat) -> Frame {
    let skip = state.seat_met(seat);
    let options = if skip {
        Vec::new()
    } else {
        state.ranked_candidates(seat, &mut None)
    };
    Frame {
        options,
        next: 0,
        applied: Vec::new(),
        skip,
    }
}

/// Every later seat of the same block still has a candidate that fits
/// (a missing supervisor counts as fitting; try_place can add one).
fn forward_ok(state: &ModelState<'_>, seats: &[Seat], later: &[usize]) -> bool {
    later.iter().all(|&j| {
        let seat = &seats[j];
        state.seat_met(seat)
            || state
                .model
                .seat_candidates(seat)
                .into_iter()
                .any(|v| match state.hard_check(v) {
                    Ok(()) => true,
                    Err(code) => code == codes::SUPERVISION,
                })
    })
}

/// Depth-first search: frame i fills seats[i].
fn search_seats(state: &mut ModelState<'_>, seats: &[Seat], monitor: &mut SearchMonitor<'_>) -> SeatSearch {
    if seats.is_empty() {
        return SeatSearch::Solved;
    }
    let mut by_block: HashMap<usize, Vec<usize>> = HashMap::new();
    for (i, seat) in seats.iter().enumerate() {
        by_block.entry(seat.block).or_default().push(i);
    }

    let mut stack = vec![open_frame(state, &seats[0])];
    loop {
        if let Some(reason) = monitor.tick(Some(state.objective())) {
            return SeatSearch::Stopped(reason);
        }
        let depth = stack.len();
        let Some(top) = stack.last_mut() else {
            return SeatSearch::Exhausted;
        };
        for v in top.applied.drain(..).rev() {
            state.remove(v);
        }

        let seat = &seats[depth - 1];
        if top.skip {
            if top.next > 0 {
                stack.pop();
                continue;
            }
            top.next = 1;
        } else {
            if top.next >= top.options.len() {
                stack.pop();
                continue;
            }
            let v = top.options[top.next];
            top.next += 1;
            let added = state.try_place(v, seat_origin(seat));
            if added.is_empty() {
                continue;
            }
            top.applied = added;
            let later: Vec<usize> = by_block
                .get(&seat.block)
                .map(|idx| idx.iter().copied().filter(|&j| j >= depth).collect())
                .unwrap_or_default();
            if !forward_ok(state, seats, &later) {
                continue;
            }
        }

        if depth == seats.len() {
            return SeatSearch::Solved;
        }
        stack.push(open_frame(state, &seats[depth]));
    }
}

/// Blocks grouped per calendar day, chronological.
fn blocks_by_day(problem: &Problem<'_>) -> Vec<Vec<usize>> {
    let mut days: Vec<Vec<usize>> = Vec::new();
    for (b, block) in problem.ctx.blocks.iter().enumerate() {
        match days.last_mut() {
            Some(day) if problem.ctx.blocks[day[0]].date == block.date => day.push(b),
            _ => days.push(vec![b]),
        }
    }
    days
}

/// Free one day and repair it; keep only improvements.
fn lns_round(
    state: &mut ModelState<'_>,
    seats: &[Seat],
    day_blocks: &[usize],
    monitor: &mut SearchMonitor<'_>,
    rng: &mut StdRng,
) -> bool {
    let before = state.objective();
    let in_day = |v: usize, state: &ModelState<'_>| day_blocks.contains(&state.model.vars[v].block);

    let snapshot: Vec<(usize, Origin)> = state
        .selected_vars()
        .into_iter()
        .filter(|&v| in_day(v, state))
        .map(|v| (v, state.origin_of(v).unwrap_or(Origin::Fill)))
        .collect();
    for (v, _) in &snapshot {
        state.remove(*v);
    }

    let day_seats: Vec<Seat> = seats
        .iter()
        .copied()
        .filter(|s| day_blocks.contains(&s.block))
        .collect();
    let repaired = match state.fill_seats(&day_seats, monitor, Some(&mut *rng)) {
        Ok(unfilled) if unfilled.is_empty() => state.fill_idle(day_blocks, monitor, Some(&mut *rng)).is_ok(),
        _ => false,
    };

    if repaired && state.objective() < before - IMPROVEMENT_EPS {
        return true;
    }
    for v in state.selected_vars() {
        if in_day(v, state) {
            state.remove(v);
        }
    }
    for (v, origin) in snapshot {
        state.add(v, origin);
    }
    false
}

impl Solver for CpSatSolver {
    fn name(&self) -> &'static str {
        "cp_sat"
    }

    #[instrument(skip_all, fields(solver = "cp_sat", seed = seed))]
    fn solve(
        &self,
        problem: &Problem<'_>,
        budget: &SolveBudget,
        seed: u64,
        control: &SolverControl,
    ) -> SchedulingResult<SolveResult> {
        let ctx = problem.ctx;
        let model = problem.model;
        let mut monitor = SearchMonitor::new(control, budget, self.name());
        let mut rng = StdRng::seed_from_u64(seed);
        let mut state = ModelState::new(ctx, model);
        let seats = model.required_seats(ctx);

        let (status, message) = match search_seats(&mut state, &seats, &mut monitor) {
            SeatSearch::Exhausted => {
                let reasons = problem.registry.explain_infeasibility(ctx);
                let message = if reasons.is_empty() {
                    format!("no assignment satisfies the {} required seats", seats.len())
                } else {
                    reasons.join("; ")
                };
                (SolverStatus::Infeasible, Some(message))
            }
            SeatSearch::Stopped(StopReason::Cancelled) => {
                (SolverStatus::Aborted, Some(StopReason::Cancelled.describe(budget)))
            }
            SeatSearch::Stopped(reason) => (
                SolverStatus::Timeout,
                Some(format!("{} before a feasible schedule was found", reason.describe(budget))),
            ),
            SeatSearch::Solved => {
                let all_blocks: Vec<usize> = (0..ctx.blocks.len()).collect();
                let mut stop = state.fill_idle(&all_blocks, &mut monitor, None).err();

                let days = blocks_by_day(problem);
                let mut improvements = 0usize;
                if stop.is_none() && !days.is_empty() {
                    for _ in 0..days.len() * LNS_ROUNDS_PER_DAY {
                        let day = rng.gen_range(0..days.len());
                        if lns_round(&mut state, &seats, &days[day], &mut monitor, &mut rng) {
                            improvements += 1;
                        }
                        if let Some(reason) = monitor.stopped() {
                            stop = Some(reason);
                            break;
                        }
                    }
                }
                tracing::debug!(improvements, objective = state.objective(), "lns finished");

                match stop {
                    Some(StopReason::Cancelled) => {
                        (SolverStatus::Aborted, Some(StopReason::Cancelled.describe(budget)))
                    }
                    Some(reason) => (SolverStatus::Feasible, Some(reason.describe(budget))),
                    None => (SolverStatus::Feasible, None),
                }
            }
        };
        monitor.finish(Some(state.objective()));

        let mut result = SolveResult::from_state(problem, self.name(), status, &state, monitor.nodes(), message);
        if result.status.has_solution() && !result.hard_violations().is_empty() {
            result.status = SolverStatus::Infeasible;
            result.message = Some(
                result
                    .hard_violations()
                    .iter()
                    .map(|v| v.message.clone())
                    .collect::<Vec<_>>()
                    .join("; "),
            );
        }

        tracing::info!(
            status = %result.status,
            assignments = result.assignments.len(),
            objective = result.objective_score,
            nodes = result.nodes,
            "cp_sat search finished"
        );
        Ok(result)
    }
}
