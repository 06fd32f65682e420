// ==========================================
// Conflict detection and resolution integration tests
// ==========================================

mod test_helpers;

use residency_scheduler::api::ApiError;
use residency_scheduler::{
    ActivityCategory, AssignmentSource, ConflictType, ResolutionStatus, Severity, SwapStatus, TimeOfDay,
};
use test_helpers::*;

/// R3 holds the day-0 PM clinic, then reports sick for that day.
fn sick_holder() -> TestEnv {
    let env = TestEnv::new();
    let repos = env.repos();
    seed_people(repos, &[resident("R2", 2), resident("R3", 3), resident("R4", 2)]);
    seed_templates(
        repos,
        &[
            template("CLINIC", ActivityCategory::Clinic),
            template("CONF", ActivityCategory::Conference),
        ],
    );
    seed_calendar(repos, day(0), day(13));
    seed_assignment(repos, "C0", "R3", day(0), TimeOfDay::PM, "CLINIC");
    seed_absence(repos, "R3", day(0), day(0));
    env
}

#[test]
fn test_scan_finds_absence_and_rescan_is_idempotent() {
    let env = sick_holder();

    let first = env.state.conflict_api.scan(day(0), day(13)).unwrap();
    assert_eq!(first.conflicts.len(), 1);
    assert_eq!(first.new_count, 1);
    let conflict = &first.conflicts[0];
    assert_eq!(conflict.conflict_type, ConflictType::AbsenceConflict);
    assert_eq!(conflict.severity, Severity::Critical);
    assert_eq!(conflict.affected_assignment_ids, vec!["C0".to_string()]);

    let second = env.state.conflict_api.scan(day(0), day(13)).unwrap();
    assert_eq!(second.new_count, 0);
    assert_eq!(second.existing_count, 1);
    assert_eq!(second.conflicts[0].conflict_id, conflict.conflict_id);
    assert_eq!(env.state.conflict_api.list_open().unwrap().len(), 1);
}

#[test]
fn test_resolve_open_substitutes_idle_resident() {
    let env = sick_holder();
    let report = env.state.conflict_api.scan(day(0), day(13)).unwrap();
    let conflict_id = report.conflicts[0].conflict_id.clone();

    let outcomes = env.state.conflict_api.resolve_open().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, ResolutionStatus::AutoResolved);
    assert!(outcomes[0].confidence >= 0.8);
    let swap_id = outcomes[0].swap_id.clone().unwrap();

    let clinic = env
        .repos()
        .assignment_repo
        .list_active_for_block(&block_id(day(0), TimeOfDay::PM))
        .unwrap();
    assert_eq!(clinic.len(), 1);
    assert_ne!(clinic[0].person_id, "R3");
    assert_eq!(clinic[0].source, AssignmentSource::Resolver);

    let stored = env.state.conflict_api.get_conflict(&conflict_id).unwrap();
    assert_eq!(stored.resolution_status, ResolutionStatus::AutoResolved);
    assert_eq!(stored.swap_id.as_deref(), Some(swap_id.as_str()));
    assert_eq!(env.state.swap_api.get_swap(&swap_id).unwrap().status, SwapStatus::Executed);

    assert!(env.state.conflict_api.list_open().unwrap().is_empty());
    assert!(env.state.conflict_api.scan(day(0), day(13)).unwrap().conflicts.is_empty());

    // a closed conflict cannot be resolved again
    assert!(matches!(
        env.state.conflict_api.resolve(&conflict_id),
        Err(ApiError::InvalidInput(_))
    ));
}

#[test]
fn test_unknown_conflict_is_not_found() {
    let env = sick_holder();
    assert!(matches!(
        env.state.conflict_api.get_conflict("missing"),
        Err(ApiError::NotFound(_))
    ));
    assert!(matches!(
        env.state.conflict_api.resolve("missing"),
        Err(ApiError::NotFound(_))
    ));
}
