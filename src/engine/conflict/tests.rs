use super::*;
use crate::domain::types::{ActivityCategory, AssignmentSource, ConflictType, ResolutionStatus, Severity, TimeOfDay};
use crate::engine::constraints::ConstraintRegistry;
use crate::engine::events::{OptionalEventPublisher, RecordingEventPublisher, ScheduleEventType};
use crate::engine::fixtures::{block_id, day, memory_repos, resident, template, Scenario};
use crate::engine::repositories::ScheduleRepositories;
use crate::engine::swap::{AssignmentLocks, SwapExecutor, SwapTarget};
use chrono::NaiveDateTime;
use std::sync::Arc;

fn now() -> NaiveDateTime {
    day(0).and_hms_opt(6, 0, 0).unwrap()
}

/// R3 holds the day-0 PM clinic but is on leave that day.
fn absent_holder() -> Scenario {
    Scenario::new(14)
        .person(resident("R2", 2))
        .person(resident("R3", 3))
        .person(resident("R4", 2))
        .template(template("CLINIC", ActivityCategory::Clinic))
        .template(template("CONF", ActivityCategory::Conference))
        .assignment("C0", "R3", day(0), TimeOfDay::PM, "CLINIC", false)
        .absence("R3", day(0), day(0))
}

fn services(scenario: &Scenario) -> (ScheduleRepositories, ConflictDetector, ConflictResolver) {
    let repos = memory_repos();
    scenario.seed(&repos);
    let policy = scenario.input.policy.clone();
    let executor = Arc::new(SwapExecutor::new(repos.clone(), policy.clone(), AssignmentLocks::new()));
    let detector = ConflictDetector::new(repos.clone(), policy);
    let resolver = ConflictResolver::new(repos.clone(), executor);
    (repos, detector, resolver)
}

#[test]
fn test_detect_classifies_absence_overlap() {
    let ctx = absent_holder().context();
    let registry = ConstraintRegistry::standard(&ctx.policy);
    let found = ConflictDetector::detect(&ctx, &registry, now());

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].conflict_type, ConflictType::AbsenceConflict);
    assert_eq!(found[0].severity, Severity::Critical);
    assert_eq!(found[0].person_id.as_deref(), Some("R3"));
    assert_eq!(found[0].affected_assignment_ids, vec!["C0".to_string()]);
    assert!(found[0].fingerprint.starts_with("absence_conflict|ABSENCE|R3|"));
}

#[test]
fn test_two_conflict_types_cascade() {
    let ctx = absent_holder()
        .assignment("D0", "R3", day(0), TimeOfDay::PM, "CONF", false)
        .context();
    let registry = ConstraintRegistry::standard(&ctx.policy);
    let found = ConflictDetector::detect(&ctx, &registry, now());

    let cascading: Vec<_> = found
        .iter()
        .filter(|c| c.conflict_type == ConflictType::Cascading)
        .collect();
    assert_eq!(cascading.len(), 1);
    assert_eq!(cascading[0].severity, Severity::Critical);
    assert_eq!(
        cascading[0].affected_assignment_ids,
        vec!["C0".to_string(), "D0".to_string()]
    );
    assert!(found.iter().any(|c| c.conflict_type == ConflictType::DoubleBooking));
}

#[test]
fn test_soft_codes_are_not_conflicts() {
    assert_eq!(conflict_type_for("PREFERENCE"), None);
    assert_eq!(conflict_type_for("CAPACITY"), Some(ConflictType::CoverageGap));
}

#[test]
fn test_rescan_is_idempotent() {
    let scenario = absent_holder();
    let repos = memory_repos();
    scenario.seed(&repos);
    let recorder = Arc::new(RecordingEventPublisher::new());
    let detector = ConflictDetector::new(repos.clone(), scenario.input.policy.clone())
        .with_events(OptionalEventPublisher::with_publisher(recorder.clone()));

    let first = detector.scan_at(day(0), day(13), now()).unwrap();
    let second = detector.scan_at(day(0), day(13), now()).unwrap();
    assert_eq!(first.new_count, 1);
    assert_eq!(second.new_count, 0);
    assert_eq!(second.existing_count, 1);
    assert_eq!(first.conflicts[0].conflict_id, second.conflicts[0].conflict_id);
    assert_eq!(repos.conflict_repo.list_all().unwrap().len(), 1);
    assert_eq!(recorder.count_of(&ScheduleEventType::ConflictDetected), 1);
}

#[test]
fn test_idle_substitute_auto_resolves() {
    let (repos, detector, resolver) = services(&absent_holder());
    let report = detector.scan_at(day(0), day(13), now()).unwrap();
    let conflict_id = report.conflicts[0].conflict_id.clone();

    let outcome = resolver.resolve_at(&conflict_id, now()).unwrap();
    assert_eq!(outcome.status, ResolutionStatus::AutoResolved);
    assert_eq!(outcome.strategy, ResolutionStrategy::Substitute);
    assert!(!outcome.keystone);
    let swap_id = outcome.swap_id.clone().unwrap();

    let active = repos
        .assignment_repo
        .list_active_for_block(&block_id(day(0), TimeOfDay::PM))
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_ne!(active[0].person_id, "R3");
    assert_eq!(active[0].source, AssignmentSource::Resolver);

    let stored = repos.conflict_repo.find_by_id(&conflict_id).unwrap().unwrap();
    assert_eq!(stored.resolution_status, ResolutionStatus::AutoResolved);
    assert_eq!(stored.swap_id.as_deref(), Some(swap_id.as_str()));

    // the absence no longer collides with anything
    let rescan = detector.scan_at(day(0), day(13), now()).unwrap();
    assert!(rescan.conflicts.is_empty());
    assert!(matches!(
        resolver.resolve_at(&conflict_id, now()),
        Err(crate::engine::error::SchedulingError::Validation(_))
    ));
}

#[test]
fn test_keystone_is_only_proposed() {
    let mut procedure = template("PROC", ActivityCategory::Procedure);
    procedure.eligible_pgy_levels = vec![3];
    let scenario = Scenario::new(7)
        .person(resident("R3", 3))
        .person(resident("R5", 3))
        .person(resident("R2", 2))
        .template(procedure)
        .assignment("P0", "R3", day(0), TimeOfDay::PM, "PROC", false)
        .absence("R3", day(0), day(0));
    let (repos, detector, resolver) = services(&scenario);
    let report = detector.scan_at(day(0), day(6), now()).unwrap();

    let outcome = resolver
        .resolve_at(&report.conflicts[0].conflict_id, now())
        .unwrap();
    assert_eq!(outcome.status, ResolutionStatus::ProposedForReview);
    assert!(outcome.keystone);
    let proposal = outcome.proposal.unwrap();
    assert_eq!(
        proposal.target,
        SwapTarget::HandOff {
            person_id: "R5".to_string()
        }
    );

    let p0 = repos.assignment_repo.find_by_id("P0").unwrap().unwrap();
    assert!(p0.active);
    assert_eq!(p0.version, 1);
    assert!(repos.swap_repo.list_for_person("R5").unwrap().is_empty());

    let stored = repos
        .conflict_repo
        .find_by_id(&report.conflicts[0].conflict_id)
        .unwrap()
        .unwrap();
    assert!(stored.resolution_detail.unwrap().contains("keystone"));
}

#[test]
fn test_coverage_gap_escalates() {
    let mut ward = template("WARD", ActivityCategory::Inpatient);
    ward.min_residents = 1;
    ward.time_of_day = Some(TimeOfDay::AM);
    let scenario = Scenario::new(1).person(resident("R2", 2)).template(ward);
    let (_repos, detector, resolver) = services(&scenario);

    let report = detector.scan_at(day(0), day(0), now()).unwrap();
    assert_eq!(report.count_of(ConflictType::CoverageGap), 1);

    let outcomes = resolver.resolve_open(now()).unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, ResolutionStatus::Escalated);
    assert!(outcomes[0].proposal.is_none());
}
