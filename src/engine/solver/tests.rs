use super::*;
use crate::domain::types::{ActivityCategory, TimeOfDay};
use crate::engine::constraints::codes;
use crate::engine::control::CancellationToken;
use crate::engine::fixtures::{block_id, day, faculty, resident, template, Scenario};
use std::collections::BTreeMap;

fn budget() -> SolveBudget {
    SolveBudget {
        time_budget: Duration::from_secs(60),
        node_limit: 20_000,
    }
}

fn week() -> Scenario {
    let mut clinic = template("CLINIC", ActivityCategory::Clinic);
    clinic.min_residents = 1;
    clinic.max_residents = 3;
    Scenario::new(7)
        .person(resident("R1", 1))
        .person(resident("R2", 2))
        .person(resident("R3", 3))
        .person(faculty("F1"))
        .person(faculty("F2"))
        .template(clinic)
        .template(template("CONF", ActivityCategory::Conference))
}

fn solve_with(solver: &dyn Solver, ctx: &SchedulingContext, seed: u64, control: &SolverControl) -> SolveResult {
    let registry = ConstraintRegistry::standard(&ctx.policy);
    let model = AssignmentModel::build(ctx, &registry);
    let problem = Problem {
        ctx,
        registry: &registry,
        model: &model,
    };
    solver.solve(&problem, &budget(), seed, control).unwrap()
}

fn solve(solver: &dyn Solver, ctx: &SchedulingContext) -> SolveResult {
    solve_with(solver, ctx, 42, &SolverControl::detached())
}

fn assert_supervised(ctx: &SchedulingContext, result: &SolveResult) {
    let mut cells: BTreeMap<(String, String), (u32, u32)> = BTreeMap::new();
    for a in &result.assignments {
        let p = ctx.person_idx(&a.person_id).unwrap();
        let entry = cells.entry((a.block_id.clone(), a.template_id.clone())).or_default();
        if ctx.people[p].is_faculty() {
            entry.1 += 1;
        } else if ctx.people[p].is_intern() {
            entry.0 += 1;
        }
    }
    for ((block, template_id), (interns, faculty)) in cells {
        let t = ctx.template_idx(&template_id).unwrap();
        if ctx.templates[t].is_clinical() && interns > 0 {
            assert!(
                interns <= faculty * ctx.templates[t].supervision_ratio,
                "{} {}: {} interns, {} faculty",
                block,
                template_id,
                interns,
                faculty
            );
        }
    }
}

#[test]
fn test_greedy_covers_every_floor() {
    let ctx = week().context();
    let result = solve(&GreedySolver::new(), &ctx);
    assert_eq!(result.status, SolverStatus::Feasible, "{:?}", result.message);
    assert!(result.hard_violations().is_empty());
    assert_supervised(&ctx, &result);

    let clinic = ctx.template_idx("CLINIC").unwrap();
    for b in 0..ctx.blocks.len() {
        let residents = result
            .placements
            .iter()
            .filter(|p| p.block == b && p.template == clinic && ctx.people[p.person].is_resident())
            .count();
        assert!(residents >= 1, "block {} uncovered", ctx.blocks[b].block_id);
    }
}

#[test]
fn test_cp_sat_is_reproducible_for_a_seed() {
    let ctx = week().context();
    let first = solve(&CpSatSolver::new(), &ctx);
    let second = solve(&CpSatSolver::new(), &ctx);
    assert!(first.status.has_solution());
    assert_eq!(first.assignment_keys(), second.assignment_keys());
    assert_eq!(first.objective_score, second.objective_score);
    assert_supervised(&ctx, &first);
}

#[test]
fn test_interns_without_faculty_are_infeasible() {
    let mut clinic = template("CLINIC", ActivityCategory::Clinic);
    clinic.min_residents = 1;
    let ctx = Scenario::new(2)
        .person(resident("R1", 1))
        .person(resident("R1B", 1))
        .template(clinic)
        .context();

    let cp_sat = solve(&CpSatSolver::new(), &ctx);
    assert_eq!(cp_sat.status, SolverStatus::Infeasible);
    assert!(cp_sat.message.unwrap_or_default().contains("PGY-1"));

    let greedy = solve(&GreedySolver::new(), &ctx);
    assert_eq!(greedy.status, SolverStatus::Infeasible);

    let milp = solve(&MilpSolver::new(), &ctx);
    assert_eq!(milp.status, SolverStatus::Infeasible);
}

#[test]
fn test_milp_proves_small_instance_optimal() {
    let mut clinic = template("CLINIC", ActivityCategory::Clinic);
    clinic.min_residents = 1;
    let ctx = Scenario::new(1)
        .person(resident("R1", 1))
        .person(resident("R2", 2))
        .person(faculty("F1"))
        .template(clinic)
        .template(template("CONF", ActivityCategory::Conference))
        .context();

    let milp = solve(&MilpSolver::new(), &ctx);
    assert_eq!(milp.status, SolverStatus::Optimal);
    assert!(milp.hard_violations().is_empty());
    assert_supervised(&ctx, &milp);

    let greedy = solve(&GreedySolver::new(), &ctx);
    assert!(milp.objective_score <= greedy.objective_score + 1e-6);
}

#[test]
fn test_locked_assignment_is_kept() {
    let ctx = week()
        .assignment("A-LOCK", "R2", day(0), TimeOfDay::AM, "CONF", true)
        .context();
    let result = solve(&CpSatSolver::new(), &ctx);
    let held: Vec<_> = result
        .assignments
        .iter()
        .filter(|a| a.person_id == "R2" && a.block_id == ctx.blocks[0].block_id)
        .collect();
    assert_eq!(held.len(), 1);
    assert_eq!(held[0].template_id, "CONF");
    assert!(held[0].fixed);
    assert_eq!(held[0].confidence, 1.0);
}

fn backends() -> Vec<Box<dyn Solver>> {
    vec![
        Box::new(GreedySolver::new()),
        Box::new(CpSatSolver::new()),
        Box::new(MilpSolver::new()),
    ]
}

#[test]
fn test_templates_are_balanced() {
    let ctx = Scenario::new(7)
        .person(resident("R2", 2))
        .person(resident("R3", 3))
        .person(resident("R4", 2))
        .person(resident("R5", 3))
        .template(template("CONF", ActivityCategory::Conference))
        .template(template("ELECTIVE", ActivityCategory::Elective))
        .context();
    let result = solve(&CpSatSolver::new(), &ctx);
    let conf = result.assignments.iter().filter(|a| a.template_id == "CONF").count() as i64;
    let elective = result.assignments.iter().filter(|a| a.template_id == "ELECTIVE").count() as i64;
    assert!(conf > 0 && elective > 0);
    assert!((conf - elective).abs() <= 4, "CONF {} vs ELECTIVE {}", conf, elective);
}

#[test]
fn test_no_template_takes_most_of_the_work_on_any_backend() {
    let ctx = Scenario::new(7)
        .person(resident("R2", 2))
        .person(resident("R3", 3))
        .person(resident("R4", 2))
        .person(resident("R5", 3))
        .template(template("CONF", ActivityCategory::Conference))
        .template(template("ELECTIVE", ActivityCategory::Elective))
        .template(template("PROC", ActivityCategory::Procedure))
        .context();

    for solver in backends() {
        let result = solve(solver.as_ref(), &ctx);
        assert!(result.status.has_solution(), "{}: {:?}", solver.name(), result.message);
        let total = result.assignments.len();
        assert!(total > 0, "{} assigned nothing", solver.name());

        let mut per_template: BTreeMap<&str, usize> = BTreeMap::new();
        for a in &result.assignments {
            *per_template.entry(a.template_id.as_str()).or_default() += 1;
        }
        assert_eq!(per_template.len(), 3, "{}: {:?}", solver.name(), per_template);
        for (template_id, count) in &per_template {
            let share = *count as f64 / total as f64;
            assert!(
                share <= 0.6,
                "{}: {} holds {} of {} assignments",
                solver.name(),
                template_id,
                count,
                total
            );
        }
    }
}

/// Two weeks, five residents (two PGY-1), two faculty, two clinical and
/// two non-clinical templates.
fn fortnight() -> Scenario {
    let mut clinic = template("CLINIC", ActivityCategory::Clinic);
    clinic.min_residents = 1;
    clinic.max_residents = 3;
    Scenario::new(14)
        .person(resident("R1", 1))
        .person(resident("R1B", 1))
        .person(resident("R2", 2))
        .person(resident("R3", 3))
        .person(resident("R4", 2))
        .person(faculty("F1"))
        .person(faculty("F2"))
        .template(clinic)
        .template(template("CONF", ActivityCategory::Conference))
        .template(template("ELECTIVE", ActivityCategory::Elective))
        .template(template("PROC", ActivityCategory::Procedure))
}

#[test]
fn test_milp_finds_a_schedule_for_a_fortnight_within_the_node_limit() {
    let ctx = fortnight().context();
    let milp = solve(&MilpSolver::new(), &ctx);
    assert!(milp.status.has_solution(), "{}: {:?}", milp.status, milp.message);
    assert!(milp.hard_violations().is_empty(), "{:?}", milp.hard_violations());
    assert_supervised(&ctx, &milp);

    let clinic = ctx.template_idx("CLINIC").unwrap();
    for b in 0..ctx.blocks.len() {
        assert!(
            milp.placements
                .iter()
                .any(|p| p.block == b && p.template == clinic && ctx.people[p.person].is_resident()),
            "block {} uncovered",
            ctx.blocks[b].block_id
        );
    }
}

#[test]
fn test_milp_is_reproducible_for_a_seed() {
    let ctx = fortnight().context();
    let first = solve_with(&MilpSolver::new(), &ctx, 7, &SolverControl::detached());
    let second = solve_with(&MilpSolver::new(), &ctx, 7, &SolverControl::detached());
    assert!(first.status.has_solution());
    assert_eq!(first.status, second.status);
    assert_eq!(first.assignment_keys(), second.assignment_keys());
    assert_eq!(first.objective_score, second.objective_score);
}

#[test]
fn test_work_committed_after_the_range_limits_the_last_days() {
    // R2 already works days 6-11, so a seventh straight day on day 5 would
    // break the one-day-off-in-seven rule
    let mut scenario = Scenario::new(6)
        .trailing(6)
        .person(resident("R2", 2))
        .template(template("CONF", ActivityCategory::Conference));
    for d in 6..12 {
        scenario = scenario.assignment(&format!("NEXT{}", d), "R2", day(d), TimeOfDay::PM, "CONF", true);
    }
    let ctx = scenario.context();
    let last_day = [block_id(day(5), TimeOfDay::AM), block_id(day(5), TimeOfDay::PM)];

    for solver in backends() {
        let result = solve(solver.as_ref(), &ctx);
        assert!(result.status.has_solution(), "{}: {:?}", solver.name(), result.message);
        assert!(!result.assignments.is_empty(), "{} assigned nothing", solver.name());
        assert!(
            result.assignments.iter().all(|a| !last_day.contains(&a.block_id)),
            "{} put R2 on day 5",
            solver.name()
        );
        assert!(
            result.violations.iter().all(|v| v.constraint != codes::REST_VIOLATION),
            "{}: {:?}",
            solver.name(),
            result.violations
        );
    }
}

#[test]
fn test_cancelled_control_aborts() {
    let ctx = week().context();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let control = SolverControl::new(cancel, 1);
    let result = solve_with(&CpSatSolver::new(), &ctx, 42, &control);
    assert_eq!(result.status, SolverStatus::Aborted);
    let result = solve_with(&GreedySolver::new(), &ctx, 42, &control);
    assert_eq!(result.status, SolverStatus::Aborted);
}

#[test]
fn test_node_limit_without_solution_is_timeout() {
    let ctx = week().context();
    let registry = ConstraintRegistry::standard(&ctx.policy);
    let model = AssignmentModel::build(&ctx, &registry);
    let problem = Problem {
        ctx: &ctx,
        registry: &registry,
        model: &model,
    };
    let tiny = SolveBudget {
        time_budget: Duration::from_secs(60),
        node_limit: 2,
    };
    let result = CpSatSolver::new()
        .solve(&problem, &tiny, 42, &SolverControl::detached())
        .unwrap();
    assert_eq!(result.status, SolverStatus::Timeout);
}

// ==========================================
// Fallback chain
// ==========================================

struct StubSolver {
    name: &'static str,
    status: SolverStatus,
}

impl Solver for StubSolver {
    fn name(&self) -> &'static str {
        self.name
    }

    fn solve(
        &self,
        _problem: &Problem<'_>,
        _budget: &SolveBudget,
        _seed: u64,
        _control: &SolverControl,
    ) -> SchedulingResult<SolveResult> {
        Ok(SolveResult::empty(self.name, self.status, "stubbed"))
    }
}

fn stub(name: &'static str, status: SolverStatus) -> Arc<dyn Solver> {
    Arc::new(StubSolver { name, status })
}

fn run_chain(chain: Vec<Arc<dyn Solver>>, ctx: &SchedulingContext) -> FallbackOutcome {
    let registry = ConstraintRegistry::standard(&ctx.policy);
    let model = AssignmentModel::build(ctx, &registry);
    let problem = Problem {
        ctx,
        registry: &registry,
        model: &model,
    };
    FallbackOrchestrator::new(chain).run(&problem, &budget(), 42, &SolverControl::detached())
}

#[test]
fn test_fallback_moves_past_timeout() {
    let ctx = week().context();
    let outcome = run_chain(
        vec![stub("cp_sat", SolverStatus::Timeout), Arc::new(GreedySolver::new())],
        &ctx,
    );
    assert!(outcome.succeeded());
    assert_eq!(outcome.result.solver_name, "greedy");
    assert_eq!(outcome.attempts.len(), 2);
    assert_eq!(outcome.attempts[0].failure_reason.as_deref(), Some("TIMEOUT: stubbed"));
    assert!(outcome.attempts[1].failure_reason.is_none());
    assert!(outcome.fallback_reason.unwrap().contains("cp_sat TIMEOUT"));
}

#[test]
fn test_fallback_all_failed_reports_infeasible() {
    let ctx = week().context();
    let outcome = run_chain(
        vec![
            stub("cp_sat", SolverStatus::Timeout),
            stub("milp", SolverStatus::Infeasible),
        ],
        &ctx,
    );
    assert!(!outcome.succeeded());
    assert_eq!(outcome.result.status, SolverStatus::Infeasible);
    let explanation = outcome.explanation.unwrap();
    assert!(explanation.contains("cp_sat TIMEOUT"));
    assert!(explanation.contains("milp INFEASIBLE"));
}

#[test]
fn test_fallback_stops_on_abort() {
    let ctx = week().context();
    let outcome = run_chain(
        vec![stub("cp_sat", SolverStatus::Aborted), Arc::new(GreedySolver::new())],
        &ctx,
    );
    assert_eq!(outcome.attempts.len(), 1);
    assert_eq!(outcome.result.status, SolverStatus::Aborted);
}

#[test]
fn test_build_chain_rejects_unknown_backend() {
    assert_eq!(build_chain(&["greedy".to_string()]).unwrap().len(), 1);
    assert!(matches!(
        build_chain(&["gurobi".to_string()]),
        Err(SchedulingError::Validation(_))
    ));
}
