// ==========================================
// MilpSolver - branch and bound over (person, block) decisions
// ==========================================
// Each group (one person, one block) picks one of its variables or
// nothing. Search is depth-first with an explicit stack; the coverage
// rows of the current block are propagated after every decision and a
// block is closed only when its floors and supervision hold.
// Incumbent: a seat-first rounding of the model (seats, then idle fill)
//            seeds the search when it closes every block
// Bound:     the non-negative penalty terms are dropped, leaving
//            preference minus coverage reward of the chosen variables
//            plus the best such term of every undecided group; a node
//            whose bound cannot beat the incumbent is pruned
// Equal-cost branches are ordered by the seed.
// Exhausting the tree proves the incumbent optimal.
// ==========================================

use super::model::{ModelState, Origin};
use super::{AssignmentModel, Problem, SolveBudget, SolveResult, Solver};
use crate::domain::types::SolverStatus;
use crate::engine::context::SchedulingContext;
use crate::engine::control::{SearchMonitor, SolverControl, StopReason};
use crate::engine::error::SchedulingResult;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::instrument;

const IMPROVEMENT_EPS: f64 = 1e-9;

#[derive(Debug, Default)]
pub struct MilpSolver;

impl MilpSolver {
    pub fn new() -> Self {
        Self
    }
}

struct Frame {
    group: usize,
    options: Vec<Option<usize>>,
    next: usize,
    applied: Option<usize>,
    /// Linear objective part of the decisions above this frame
    linear: f64,
}

enum TreeEnd {
    Exhausted,
    Stopped(StopReason),
}

type Incumbent = (f64, Vec<(usize, Origin)>);

fn origin_of_var(ctx: &SchedulingContext, model: &AssignmentModel, v: usize) -> Origin {
    let var = &model.vars[v];
    let template = &ctx.templates[var.template];
    if var.faculty && template.is_clinical() {
        Origin::Supervision
    } else if !var.faculty && template.min_residents > 0 {
        Origin::Coverage
    } else {
        Origin::Fill
    }
}

/// Branch order: feasible variables then "nothing", by objective delta,
/// ties to the least used template, then by seed.
fn open_frame(state: &ModelState<'_>, group: usize, linear: f64, rng: &mut StdRng) -> Frame {
    let model = state.model;
    let mut scored: Vec<(f64, usize, u32, Option<usize>)> = model.groups[group]
        .vars
        .iter()
        .copied()
        .filter(|&v| state.hard_check(v).is_ok())
        .map(|v| {
            let t = model.vars[v].template;
            (state.delta(v), state.template_count(t), rng.gen::<u32>(), Some(v))
        })
        .collect();
    scored.push((0.0, usize::MAX, u32::MAX, None));
    scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));
    Frame {
        group,
        options: scored.into_iter().map(|(.., o)| o).collect(),
        next: 0,
        applied: None,
        linear,
    }
}

/// Part of the objective that never goes below zero is left out, so
/// `fixed_linear + chosen + suffix[next group]` never exceeds the final
/// objective of any completion.
struct Bound {
    reward: f64,
    fixed_linear: f64,
    suffix: Vec<f64>,
}

impl Bound {
    fn new(model: &AssignmentModel, reward: f64) -> Self {
        let mut suffix = vec![0.0; model.groups.len() + 1];
        for g in (0..model.groups.len()).rev() {
            let cheapest = model.groups[g]
                .vars
                .iter()
                .map(|&v| model.vars[v].base_cost - reward)
                .fold(0.0_f64, f64::min);
            suffix[g] = suffix[g + 1] + cheapest;
        }
        Self {
            reward,
            fixed_linear: -reward * model.fixed.len() as f64,
            suffix,
        }
    }

    fn step(&self, model: &AssignmentModel, v: usize) -> f64 {
        model.vars[v].base_cost - self.reward
    }

    fn at(&self, linear: f64, next_group: usize) -> f64 {
        self.fixed_linear + linear + self.suffix[next_group]
    }
}

/// Coverage floors of `block` are still reachable with the groups of
/// that block not yet decided.
fn coverage_reachable(state: &ModelState<'_>, block: usize, decided: usize) -> bool {
    let model = state.model;
    let ctx = state.ctx;
    let pending: Vec<usize> = model
        .groups_of_block(block)
        .iter()
        .copied()
        .filter(|&g| g > decided)
        .collect();

    ctx.templates.iter().enumerate().all(|(t, template)| {
        if template.min_residents == 0 || !template.allows_time(ctx.blocks[block].time_of_day) {
            return true;
        }
        let have = state.cell(block, t).residents();
        if have >= template.min_residents {
            return true;
        }
        let possible = pending
            .iter()
            .filter(|&&g| {
                model.groups[g]
                    .vars
                    .iter()
                    .any(|&v| model.vars[v].template == t && !model.vars[v].faculty)
            })
            .count() as u32;
        have + possible >= template.min_residents
    })
}

/// Floors and supervision of a fully decided block.
fn block_closes(state: &ModelState<'_>, block: usize) -> bool {
    let ctx = state.ctx;
    ctx.templates.iter().enumerate().all(|(t, template)| {
        if !template.allows_time(ctx.blocks[block].time_of_day) {
            return true;
        }
        let cell = state.cell(block, t);
        let covered = cell.residents() >= template.min_residents;
        let supervised = !template.is_clinical()
            || cell.faculty >= cell.faculty_needed(template.supervision_ratio, template.senior_supervision_ratio);
        covered && supervised
    })
}

fn snapshot(state: &ModelState<'_>) -> Vec<(usize, Origin)> {
    state
        .selected_vars()
        .into_iter()
        .map(|v| (v, state.origin_of(v).unwrap_or(Origin::Fill)))
        .collect()
}

/// Seat-first rounding on a copy of `state`. Kept only if every block
/// closes.
fn warm_start(
    state: &ModelState<'_>,
    monitor: &mut SearchMonitor<'_>,
    rng: &mut StdRng,
) -> Option<Incumbent> {
    let ctx = state.ctx;
    let mut rounded = state.clone();
    let seats = state.model.required_seats(ctx);
    let all_blocks: Vec<usize> = (0..ctx.blocks.len()).collect();

    let unfilled = rounded.fill_seats(&seats, monitor, Some(rng)).ok()?;
    rounded.fill_idle(&all_blocks, monitor, None).ok()?;
    if !unfilled.is_empty() || !all_blocks.iter().all(|&b| block_closes(&rounded, b)) {
        tracing::debug!(unfilled = unfilled.len(), "milp warm start rejected");
        return None;
    }
    tracing::debug!(objective = rounded.objective(), "milp warm start accepted");
    Some((rounded.objective(), snapshot(&rounded)))
}

fn branch_and_bound(
    state: &mut ModelState<'_>,
    bound: &Bound,
    monitor: &mut SearchMonitor<'_>,
    rng: &mut StdRng,
    incumbent: &mut Option<Incumbent>,
) -> TreeEnd {
    let model = state.model;
    let ctx = state.ctx;
    let groups = &model.groups;

    if groups.is_empty() {
        *incumbent = Some((state.objective(), Vec::new()));
        return TreeEnd::Exhausted;
    }

    let mut pruned: u64 = 0;
    let mut stack = vec![open_frame(state, 0, 0.0, rng)];
    loop {
        let best = incumbent.as_ref().map(|(obj, _)| *obj);
        if let Some(reason) = monitor.tick(best) {
            tracing::debug!(pruned, "milp search stopped");
            return TreeEnd::Stopped(reason);
        }
        let depth = stack.len();
        let Some(top) = stack.last_mut() else {
            tracing::debug!(pruned, "milp tree exhausted");
            return TreeEnd::Exhausted;
        };
        if let Some(v) = top.applied.take() {
            state.remove(v);
        }
        if top.next >= top.options.len() {
            stack.pop();
            continue;
        }
        let choice = top.options[top.next];
        top.next += 1;
        let g = top.group;
        let mut linear = top.linear;
        if let Some(v) = choice {
            if state.hard_check(v).is_err() {
                continue;
            }
            state.add(v, origin_of_var(ctx, model, v));
            top.applied = Some(v);
            linear += bound.step(model, v);
        }

        if let Some(b) = best {
            if bound.at(linear, g + 1) >= b - IMPROVEMENT_EPS {
                pruned += 1;
                continue;
            }
        }

        let block = groups[g].block;
        if !coverage_reachable(state, block, g) {
            continue;
        }
        let closes_block = g + 1 == groups.len() || groups[g + 1].block != block;
        if closes_block && !block_closes(state, block) {
            continue;
        }

        if depth == groups.len() {
            let objective = state.objective();
            if best.map_or(true, |b| objective < b - IMPROVEMENT_EPS) {
                tracing::debug!(objective, nodes = monitor.nodes(), "milp incumbent improved");
                *incumbent = Some((objective, snapshot(state)));
            }
            continue;
        }
        stack.push(open_frame(state, depth, linear, rng));
    }
}

impl Solver for MilpSolver {
    fn name(&self) -> &'static str {
        "milp"
    }

    #[instrument(skip_all, fields(solver = "milp", seed = seed))]
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

        // blocks nobody can be added to are decided by the fixed input alone
        let stuck: Vec<usize> = (0..ctx.blocks.len())
            .filter(|&b| model.groups_of_block(b).is_empty() && !block_closes(&state, b))
            .collect();

        let mut incumbent: Option<Incumbent> = None;
        let end = if stuck.is_empty() {
            incumbent = warm_start(&state, &mut monitor, &mut rng);
            let bound = Bound::new(model, problem.registry.coverage_reward());
            branch_and_bound(&mut state, &bound, &mut monitor, &mut rng, &mut incumbent)
        } else {
            TreeEnd::Exhausted
        };
        monitor.finish(incumbent.as_ref().map(|(obj, _)| *obj));

        let (status, message) = match (&end, &incumbent) {
            (TreeEnd::Exhausted, Some(_)) => (SolverStatus::Optimal, None),
            (TreeEnd::Exhausted, None) => {
                let mut reasons = problem.registry.explain_infeasibility(ctx);
                for &b in &stuck {
                    reasons.push(format!(
                        "{} {} cannot meet its floors with the fixed assignments",
                        ctx.blocks[b].date, ctx.blocks[b].time_of_day
                    ));
                }
                if reasons.is_empty() {
                    reasons.push("branch and bound exhausted without a feasible schedule".to_string());
                }
                (SolverStatus::Infeasible, Some(reasons.join("; ")))
            }
            (TreeEnd::Stopped(StopReason::Cancelled), _) => {
                (SolverStatus::Aborted, Some(StopReason::Cancelled.describe(budget)))
            }
            (TreeEnd::Stopped(reason), Some(_)) => (SolverStatus::Feasible, Some(reason.describe(budget))),
            (TreeEnd::Stopped(reason), None) => (
                SolverStatus::Timeout,
                Some(format!("{} before a feasible schedule was found", reason.describe(budget))),
            ),
        };

        // report the incumbent when there is one, the last partial otherwise
        let result = match incumbent {
            Some((_, chosen)) => {
                let mut best = ModelState::new(ctx, model);
                for (v, origin) in chosen {
                    best.add(v, origin);
                }
                SolveResult::from_state(problem, self.name(), status, &best, monitor.nodes(), message)
            }
            None => SolveResult::from_state(problem, self.name(), status, &state, monitor.nodes(), message),
        };

        tracing::info!(
            status = %result.status,
            assignments = result.assignments.len(),
            objective = result.objective_score,
            nodes = result.nodes,
            "milp search finished"
        );
        Ok(result)
    }
}
