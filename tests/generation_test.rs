// ==========================================
// Schedule generation integration tests
// ==========================================
// Scope:
// 1. Generated schedules satisfy every hard rule and get committed
// 2. Same seed, same schedule
// 3. PGY-1 supervision pairing
// 4. Fallback chain bookkeeping on the ScheduleRun
// 5. Infeasible runs are recorded but not committed
// 6. Locked assignments survive regeneration
// 7. Work committed after the range counts towards rolling windows
// ==========================================

mod test_helpers;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use residency_scheduler::api::ApiError;
use residency_scheduler::config::{config_keys, SchedulingPolicy, StaticConfigReader};
use residency_scheduler::engine::solver::{Problem, SolveBudget};
use residency_scheduler::engine::{
    GenerationRequest, GreedySolver, ScheduleGenerator, SolveResult, Solver, SolverControl,
};
use residency_scheduler::engine::SchedulingResult;
use residency_scheduler::{ActivityCategory, ConflictType, SolverStatus, TimeOfDay};
use test_helpers::*;

/// R1 (PGY-1), R2, R3, two faculty, a clinic needing one resident per
/// half day and a conference.
fn seed_week(env: &TestEnv) {
    let repos = env.repos();
    let mut clinic = template("CLINIC", ActivityCategory::Clinic);
    clinic.min_residents = 1;
    clinic.max_residents = 3;
    seed_people(
        repos,
        &[
            resident("R1", 1),
            resident("R2", 2),
            resident("R3", 3),
            faculty("F1"),
            faculty("F2"),
        ],
    );
    seed_templates(
        repos,
        &[
            clinic,
            template("CONF", ActivityCategory::Conference),
            template("ELECTIVE", ActivityCategory::Elective),
        ],
    );
    seed_calendar(repos, day(0), day(6));
}

/// Keep searches short for the test suite.
fn small_budget(env: &mut TestEnv) {
    env.state
        .config_api
        .update_config("global", config_keys::SOLVER_NODE_LIMIT, "20000", "test", "short searches")
        .unwrap();
    env.reload();
}

#[tokio::test]
async fn test_generated_week_is_clean_and_committed() {
    let mut env = TestEnv::new();
    small_budget(&mut env);
    seed_week(&env);

    let mut request = GenerationRequest::new(day(0), day(6));
    request.seed = Some(42);
    let response = env.state.schedule_api.generate(request).await.unwrap();

    assert!(response.status.has_solution());
    assert!(response.committed);
    assert!(response.assignment_count > 0);
    assert!(response.violations.iter().all(|v| v.constraint != "ABSENCE"));

    // committed rows carry the run id and pass a fresh conflict scan
    let run = env.state.schedule_api.get_run(&response.run_id).unwrap();
    assert!(run.committed);
    assert_eq!(run.seed, 42);
    assert!(!run.attempts.is_empty());
    let report = env.state.conflict_api.scan(day(0), day(6)).unwrap();
    assert!(report.conflicts.is_empty(), "{:?}", report.conflicts);

    let rows = env
        .state
        .schedule_api
        .list_assignments(day(0), day(6))
        .unwrap();
    assert_eq!(rows.len(), response.assignment_count);

    // at least one free day per person in the week
    let mut worked: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for a in &rows {
        worked
            .entry(a.person_id.clone())
            .or_default()
            .insert(a.block_id[..10].to_string());
    }
    for (person, days) in &worked {
        assert!(days.len() <= 6, "{} worked {} days", person, days.len());
    }

    // no single template takes more than 60% of the resident load
    let resident_rows: Vec<_> = rows.iter().filter(|a| a.person_id.starts_with('R')).collect();
    let mut per_template: BTreeMap<&str, usize> = BTreeMap::new();
    for a in &resident_rows {
        *per_template.entry(a.template_id.as_str()).or_default() += 1;
    }
    for (template_id, count) in per_template {
        assert!(
            count * 10 <= resident_rows.len() * 6,
            "{} holds {} of {} resident assignments",
            template_id,
            count,
            resident_rows.len()
        );
    }
}

#[tokio::test]
async fn test_same_seed_same_schedule() {
    let env = TestEnv::new();
    seed_week(&env);

    let mut policy = SchedulingPolicy::default();
    policy.solver.node_limit = 20_000;
    let generator = ScheduleGenerator::new(env.repos().clone(), Arc::new(StaticConfigReader::new(policy)));

    let mut request = GenerationRequest::new(day(0), day(6));
    request.seed = Some(42);
    request.dry_run = true;
    let first = generator.generate(request.clone()).await.unwrap();
    let second = generator.generate(request).await.unwrap();

    assert!(first.result.status.has_solution());
    assert_eq!(first.result.assignment_keys(), second.result.assignment_keys());
    assert_eq!(first.result.objective_score, second.result.objective_score);
    assert!(!first.committed);
    assert!(env.state.schedule_api.list_runs(10).unwrap().is_empty());
}

#[tokio::test]
async fn test_two_interns_one_faculty_are_supervised_or_infeasible() {
    let mut env = TestEnv::new();
    small_budget(&mut env);
    let repos = env.repos();
    let mut clinic = template("CLINIC", ActivityCategory::Clinic);
    clinic.min_residents = 2;
    clinic.supervision_ratio = 2;
    clinic.time_of_day = Some(TimeOfDay::AM);
    seed_people(repos, &[resident("R1", 1), resident("R1B", 1), faculty("F1")]);
    seed_templates(repos, &[clinic]);
    seed_calendar(repos, day(0), day(0));

    let result = env
        .state
        .schedule_api
        .generate(GenerationRequest::new(day(0), day(0)))
        .await;
    match result {
        Ok(response) => {
            assert!(response.committed);
            let rows = env
                .state
                .schedule_api
                .list_assignments(day(0), day(0))
                .unwrap();
            let interns = rows.iter().filter(|a| a.person_id.starts_with("R1")).count();
            let faculty = rows.iter().filter(|a| a.person_id == "F1").count();
            assert_eq!(interns, 2);
            assert_eq!(faculty, 1);
            assert!(rows.iter().all(|a| a.block_id == block_id(day(0), TimeOfDay::AM)));
        }
        Err(ApiError::Infeasible { .. }) => {}
        Err(other) => panic!("unexpected error {:?}", other),
    }
}

// ==========================================
// Fallback chain
// ==========================================

struct StubSolver {
    name: &'static str,
    status: SolverStatus,
    reason: &'static str,
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
        Ok(SolveResult::empty(self.name, self.status, self.reason))
    }
}

#[tokio::test]
async fn test_fallback_to_greedy_records_both_failures() {
    let env = TestEnv::new();
    seed_week(&env);

    let chain: Vec<Arc<dyn Solver>> = vec![
        Arc::new(StubSolver {
            name: "cp_sat",
            status: SolverStatus::Timeout,
            reason: "time budget exhausted",
        }),
        Arc::new(StubSolver {
            name: "milp",
            status: SolverStatus::Infeasible,
            reason: "relaxation infeasible",
        }),
        Arc::new(GreedySolver::new()),
    ];
    let generator = ScheduleGenerator::new(
        env.repos().clone(),
        Arc::new(StaticConfigReader::new(SchedulingPolicy::default())),
    )
    .with_chain(chain);

    let outcome = generator
        .generate(GenerationRequest::new(day(0), day(6)))
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert!(outcome.committed);

    let run = env.repos().run_repo.find_by_id(&outcome.run.run_id).unwrap().unwrap();
    assert_eq!(run.solver_used, "greedy");
    assert_eq!(run.attempts.len(), 3);
    assert!(run.attempts[0]
        .failure_reason
        .as_deref()
        .unwrap()
        .contains("time budget exhausted"));
    assert!(run.attempts[1]
        .failure_reason
        .as_deref()
        .unwrap()
        .contains("relaxation infeasible"));
    assert!(run.attempts[2].failure_reason.is_none());
    let fallback = run.fallback_reason.unwrap();
    assert!(fallback.contains("cp_sat"));
    assert!(fallback.contains("milp"));
}

#[tokio::test]
async fn test_infeasible_run_is_recorded_not_committed() {
    let env = TestEnv::new();
    let repos = env.repos();
    let mut clinic = template("CLINIC", ActivityCategory::Clinic);
    clinic.min_residents = 1;
    seed_people(repos, &[resident("R1", 1), resident("R1B", 1)]);
    seed_templates(repos, &[clinic]);
    seed_calendar(repos, day(0), day(1));

    let mut request = GenerationRequest::new(day(0), day(1));
    request.solver_override = Some("greedy".to_string());
    let err = env.state.schedule_api.generate(request).await.unwrap_err();
    assert!(matches!(err, ApiError::Infeasible { .. }), "{:?}", err);
    assert!(!err.is_retryable());

    let runs = env.state.schedule_api.list_runs(5).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, SolverStatus::Infeasible);
    assert!(!runs[0].committed);
    assert!(env
        .state
        .schedule_api
        .list_assignments(day(0), day(1))
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_locked_assignment_survives_regeneration() {
    let env = TestEnv::new();
    seed_week(&env);
    seed_assignment(env.repos(), "PINNED", "R2", day(2), TimeOfDay::PM, "CONF");

    let pinned = env
        .state
        .schedule_api
        .set_assignment_locked("PINNED", 1, true)
        .unwrap();
    assert!(pinned.locked);
    assert_eq!(pinned.etag, "PINNED:2");

    // stale ETag is rejected
    let stale = env.state.schedule_api.set_assignment_locked("PINNED", 1, false);
    assert!(matches!(stale, Err(ApiError::OptimisticLockFailure(_))));

    let mut request = GenerationRequest::new(day(0), day(6));
    request.solver_override = Some("greedy".to_string());
    let response = env.state.schedule_api.generate(request).await.unwrap();
    assert!(response.committed);

    let kept = env.repos().assignment_repo.find_by_id("PINNED").unwrap().unwrap();
    assert!(kept.active);
    let r2_pm = env
        .repos()
        .assignment_repo
        .list_active_for_block(&block_id(day(2), TimeOfDay::PM))
        .unwrap();
    assert_eq!(r2_pm.iter().filter(|a| a.person_id == "R2").count(), 1);
}

#[tokio::test]
async fn test_generation_respects_work_committed_after_the_range() {
    let env = TestEnv::new();
    let repos = env.repos();
    seed_people(repos, &[resident("R2", 2)]);
    seed_templates(repos, &[template("CONF", ActivityCategory::Conference)]);
    seed_calendar(repos, day(0), day(13));
    // next week's conference block is already published
    for d in 6..12 {
        seed_assignment(repos, &format!("NEXT{}", d), "R2", day(d), TimeOfDay::PM, "CONF");
        env.state
            .schedule_api
            .set_assignment_locked(&format!("NEXT{}", d), 1, true)
            .unwrap();
    }

    let mut request = GenerationRequest::new(day(0), day(5));
    request.solver_override = Some("greedy".to_string());
    let response = env.state.schedule_api.generate(request).await.unwrap();
    assert!(response.committed);
    assert!(response.assignment_count > 0);

    let worked: BTreeSet<String> = env
        .state
        .schedule_api
        .list_assignments(day(0), day(5))
        .unwrap()
        .into_iter()
        .map(|a| a.block_id[..10].to_string())
        .collect();
    assert!(worked.len() <= 5, "worked {:?}", worked);
    assert!(!worked.contains(&day(5).to_string()));

    // the published week is untouched and nothing crosses the boundary
    assert_eq!(env.state.schedule_api.list_assignments(day(6), day(11)).unwrap().len(), 6);
    let report = env.state.conflict_api.scan(day(0), day(11)).unwrap();
    assert_eq!(report.count_of(ConflictType::RestViolation), 0, "{:?}", report.conflicts);
    assert_eq!(report.count_of(ConflictType::HourViolation), 0);
}
