// ==========================================
// Configuration integration tests
// ==========================================
// Policy values live in config_kv and are read when the state is built.
// ==========================================

mod test_helpers;

use residency_scheduler::api::ApiError;
use residency_scheduler::config::config_keys;
use residency_scheduler::engine::GenerationRequest;
use residency_scheduler::ActivityCategory;
use test_helpers::*;

#[test]
fn test_policy_change_applies_after_reload() {
    let mut env = TestEnv::new();
    assert_eq!(env.state.policy.max_weekly_hours, 80.0);

    env.state
        .config_api
        .update_config("global", config_keys::MAX_WEEKLY_HOURS, "60", "chief", "pilot reduced hours")
        .unwrap();
    // the running state keeps the policy it was built with
    assert_eq!(env.state.policy.max_weekly_hours, 80.0);
    assert_eq!(env.state.config_api.get_policy().unwrap().max_weekly_hours, 60.0);

    env.reload();
    assert_eq!(env.state.policy.max_weekly_hours, 60.0);
    assert_eq!(env.state.policy.hours_window_limit(), 240.0);
}

#[test]
fn test_invalid_solver_order_is_rejected_and_reverted() {
    let env = TestEnv::new();
    let err = env
        .state
        .config_api
        .update_config("global", config_keys::SOLVER_ORDER, "gurobi", "chief", "try another backend")
        .unwrap_err();
    match err {
        ApiError::ConfigError(msg) => assert!(msg.contains("gurobi")),
        other => panic!("expected ConfigError, got {:?}", other),
    }

    let policy = env.state.config_api.get_policy().unwrap();
    assert_eq!(policy.solver.order, vec!["cp_sat", "milp", "greedy"]);
    assert!(env
        .state
        .config_api
        .get_config("global", config_keys::SOLVER_ORDER)
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_solver_order_drives_generation() {
    let mut env = TestEnv::new();
    env.state
        .config_api
        .update_config("global", config_keys::SOLVER_ORDER, "greedy", "chief", "fast drafts")
        .unwrap();
    env.reload();

    let repos = env.repos();
    seed_people(repos, &[resident("R2", 2), resident("R3", 3), faculty("F1")]);
    seed_templates(repos, &[template("CONF", ActivityCategory::Conference)]);
    seed_calendar(repos, day(0), day(1));

    let response = env
        .state
        .schedule_api
        .generate(GenerationRequest::new(day(0), day(1)))
        .await
        .unwrap();
    assert_eq!(response.solver_used, "greedy");
    assert!(response.fallback_reason.is_none());

    let run = env.state.schedule_api.get_run(&response.run_id).unwrap();
    assert_eq!(run.attempts.len(), 1);
}
