use super::*;
use crate::domain::person::Absence;
use crate::domain::types::{ActivityCategory, AssignmentSource, SwapStatus, TimeOfDay};
use crate::engine::constraints::{codes, ConstraintRegistry};
use crate::engine::fixtures::{block_id, day, memory_repos, resident, template, Scenario};
use chrono::{Duration as ChronoDuration, NaiveDateTime};
use std::sync::Arc;

/// R2 works 13h AM ward shifts six days in seven for four weeks (312h);
/// R3 holds the PM clinic on day 0 and R4 the PM clinic on day 1.
fn heavy_month() -> Scenario {
    let mut ward = template("WARD", ActivityCategory::Inpatient);
    ward.hours_per_block = Some(13.0);
    let mut clinic = template("CLINIC", ActivityCategory::Clinic);
    clinic.hours_per_block = Some(10.0);

    let mut s = Scenario::new(28)
        .person(resident("R2", 2))
        .person(resident("R3", 3))
        .person(resident("R4", 2))
        .template(ward)
        .template(clinic);
    for d in 0..28 {
        if d % 7 != 6 {
            s = s.assignment(&format!("W{}", d), "R2", day(d), TimeOfDay::AM, "WARD", false);
        }
    }
    s.assignment("C0", "R3", day(0), TimeOfDay::PM, "CLINIC", false)
        .assignment("C1", "R4", day(1), TimeOfDay::PM, "CLINIC", false)
}

fn hand_off(source: &str, person: &str, key: &str) -> SwapRequest {
    SwapRequest {
        source_assignment_id: source.to_string(),
        expected_version: 1,
        target: SwapTarget::HandOff {
            person_id: person.to_string(),
        },
        idempotency_key: key.to_string(),
        actor: "chief".to_string(),
    }
}

fn t0() -> NaiveDateTime {
    day(-1).and_hms_opt(8, 0, 0).unwrap()
}

fn executor_for(scenario: &Scenario) -> (SwapExecutor, crate::engine::repositories::ScheduleRepositories) {
    let repos = memory_repos();
    scenario.seed(&repos);
    let executor = SwapExecutor::new(repos.clone(), scenario.input.policy.clone(), AssignmentLocks::new());
    (executor, repos)
}

// ==========================================
// Validator (in memory)
// ==========================================

#[test]
fn test_hand_off_past_hour_ceiling_is_blocked() {
    let ctx = heavy_month().context();
    let registry = ConstraintRegistry::standard(&ctx.policy);
    let validator = SwapValidator::new(&ctx, &registry);

    let plan = validator.plan(&hand_off("C0", "R2", "k1")).unwrap();
    assert_eq!(plan.removed_ids(), vec!["C0".to_string()]);

    let validation = validator.validate(&plan).unwrap();
    assert!(!validation.decision.is_allowed());
    assert_eq!(validation.decision.blocked_codes(), vec![codes::WORK_HOUR_VIOLATION.to_string()]);
    let SwapDecision::Blocked { reasons } = &validation.decision else {
        panic!("expected BLOCKED");
    };
    assert_eq!(reasons[0].person_id.as_deref(), Some("R2"));
    assert!((reasons[0].magnitude - 2.0).abs() < 1e-9);
    assert_eq!(validation.affected_person_ids, vec!["R2".to_string(), "R3".to_string()]);
}

#[test]
fn test_hand_off_to_light_schedule_is_allowed() {
    let ctx = heavy_month().context();
    let registry = ConstraintRegistry::standard(&ctx.policy);
    let validator = SwapValidator::new(&ctx, &registry);

    let plan = validator.plan(&hand_off("C0", "R4", "k1")).unwrap();
    let validation = validator.validate(&plan).unwrap();
    assert!(validation.decision.is_allowed(), "{:?}", validation.decision);
}

#[test]
fn test_plan_rejects_stale_version_and_no_ops() {
    let ctx = heavy_month().context();
    let registry = ConstraintRegistry::standard(&ctx.policy);
    let validator = SwapValidator::new(&ctx, &registry);

    let mut stale = hand_off("C0", "R4", "k1");
    stale.expected_version = 2;
    assert!(matches!(validator.plan(&stale), Err(SchedulingError::ConcurrencyConflict(_))));

    let to_self = hand_off("C0", "R3", "k2");
    assert!(matches!(validator.plan(&to_self), Err(SchedulingError::Validation(_))));

    let same_slot = SwapRequest {
        target: SwapTarget::MoveTo {
            block_id: block_id(day(0), TimeOfDay::PM),
            template_id: "CLINIC".to_string(),
        },
        ..hand_off("C0", "R4", "k3")
    };
    assert!(matches!(validator.plan(&same_slot), Err(SchedulingError::Validation(_))));
}

#[test]
fn test_move_into_absence_is_blocked() {
    let ctx = heavy_month().absence("R3", day(3), day(3)).context();
    let registry = ConstraintRegistry::standard(&ctx.policy);
    let validator = SwapValidator::new(&ctx, &registry);

    let request = SwapRequest {
        target: SwapTarget::MoveTo {
            block_id: block_id(day(3), TimeOfDay::PM),
            template_id: "CLINIC".to_string(),
        },
        ..hand_off("C0", "R4", "k1")
    };
    let validation = validator.validate(&validator.plan(&request).unwrap()).unwrap();
    assert_eq!(validation.decision.blocked_codes(), vec![codes::ABSENCE.to_string()]);
}

#[test]
fn test_exchange_swaps_people_between_slots() {
    let ctx = heavy_month().context();
    let registry = ConstraintRegistry::standard(&ctx.policy);
    let validator = SwapValidator::new(&ctx, &registry);

    let request = SwapRequest {
        target: SwapTarget::Exchange {
            assignment_id: "C1".to_string(),
            expected_version: 1,
        },
        ..hand_off("C0", "R4", "k1")
    };
    let plan = validator.plan(&request).unwrap();
    assert_eq!(plan.changes.len(), 2);
    let r3 = ctx.person_idx("R3").unwrap();
    let r4 = ctx.person_idx("R4").unwrap();
    assert_eq!(plan.changes[0].added.person, r4);
    assert_eq!(plan.changes[1].added.person, r3);
    assert!(validator.validate(&plan).unwrap().decision.is_allowed());
}

#[test]
fn test_swap_decision_labels() {
    assert_eq!(SwapDecision::Allowed.label(), "ALLOWED");
    assert_eq!(SwapDecision::from_label("ALLOWED_WITH_WARNINGS").label(), "ALLOWED_WITH_WARNINGS");
    assert!(SwapDecision::from_label("ALLOWED").is_allowed());
    let json = serde_json::to_string(&SwapTarget::HandOff {
        person_id: "R4".to_string(),
    })
    .unwrap();
    assert!(json.contains("\"kind\":\"hand_off\""));
}

// ==========================================
// Executor (SQLite in memory)
// ==========================================

#[test]
fn test_blocked_swap_changes_nothing() {
    let (executor, repos) = executor_for(&heavy_month());

    let outcome = executor
        .execute_at(&hand_off("C0", "R2", "blocked-1"), AssignmentSource::Swap, t0())
        .unwrap();
    assert!(!outcome.executed());
    assert_eq!(outcome.decision.blocked_codes(), vec![codes::WORK_HOUR_VIOLATION.to_string()]);

    let c0 = repos.assignment_repo.find_by_id("C0").unwrap().unwrap();
    assert!(c0.active);
    assert_eq!(c0.version, 1);
    assert!(repos.swap_repo.find_by_idempotency_key("blocked-1").unwrap().is_none());
}

#[test]
fn test_executed_hand_off_supersedes_and_records() {
    let (executor, repos) = executor_for(&heavy_month());

    let outcome = executor
        .execute_at(&hand_off("C0", "R4", "ok-1"), AssignmentSource::Swap, t0())
        .unwrap();
    let record = outcome.record.clone().unwrap();
    assert!(!outcome.replayed);
    assert_eq!(record.person_ids, vec!["R3".to_string(), "R4".to_string()]);
    assert_eq!(record.status, SwapStatus::Executed);
    assert_eq!(record.rollback_deadline, t0() + ChronoDuration::hours(24));

    let new_id = &outcome.new_assignment_ids[0];
    let old = repos.assignment_repo.find_by_id("C0").unwrap().unwrap();
    assert!(!old.active);
    assert_eq!(old.superseded_by.as_deref(), Some(new_id.as_str()));

    let new = repos.assignment_repo.find_by_id(new_id).unwrap().unwrap();
    assert_eq!(new.person_id, "R4");
    assert_eq!(new.block_id, block_id(day(0), TimeOfDay::PM));
    assert_eq!(new.source, AssignmentSource::Swap);

    assert_eq!(executor.list_swaps_for_person("R4").unwrap().len(), 1);
}

#[test]
fn test_same_key_replays_without_second_mutation() {
    let (executor, repos) = executor_for(&heavy_month());
    let request = hand_off("C0", "R4", "replay-1");

    let first = executor.execute_at(&request, AssignmentSource::Swap, t0()).unwrap();
    let second = executor.execute_at(&request, AssignmentSource::Swap, t0()).unwrap();
    assert!(second.replayed);
    assert_eq!(first.record.unwrap().swap_id, second.record.unwrap().swap_id);
    assert_eq!(first.new_assignment_ids, second.new_assignment_ids);

    let active = repos
        .assignment_repo
        .list_active_for_block(&block_id(day(0), TimeOfDay::PM))
        .unwrap();
    assert_eq!(active.len(), 1);

    let reused = hand_off("C1", "R3", "replay-1");
    assert!(matches!(
        executor.execute_at(&reused, AssignmentSource::Swap, t0()),
        Err(SchedulingError::Validation(_))
    ));
}

#[test]
fn test_stale_version_is_a_concurrency_conflict() {
    let (executor, _repos) = executor_for(&heavy_month());
    executor
        .execute_at(&hand_off("C0", "R4", "first"), AssignmentSource::Swap, t0())
        .unwrap();

    // C0 is gone; C1 is validated against an old version
    let mut stale = hand_off("C1", "R3", "second");
    stale.expected_version = 7;
    let err = executor.execute_at(&stale, AssignmentSource::Swap, t0()).unwrap_err();
    assert!(err.is_retryable());
}

#[test]
fn test_rollback_restores_prior_state() {
    let (executor, repos) = executor_for(&heavy_month());
    let outcome = executor
        .execute_at(&hand_off("C0", "R4", "rb-1"), AssignmentSource::Swap, t0())
        .unwrap();
    let swap_id = outcome.record.unwrap().swap_id;

    let record = executor
        .rollback_at(&swap_id, "chief", t0() + ChronoDuration::hours(2))
        .unwrap();
    assert_eq!(record.status, SwapStatus::RolledBack);
    assert!(record.rolled_back_at.is_some());

    let active = repos
        .assignment_repo
        .list_active_for_block(&block_id(day(0), TimeOfDay::PM))
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].assignment_id, "C0");
    assert_eq!(active[0].person_id, "R3");

    assert!(matches!(
        executor.rollback_at(&swap_id, "chief", t0() + ChronoDuration::hours(3)),
        Err(SchedulingError::Validation(_))
    ));
}

#[test]
fn test_rollback_after_deadline_is_refused() {
    let (executor, repos) = executor_for(&heavy_month());
    let outcome = executor
        .execute_at(&hand_off("C0", "R4", "rb-2"), AssignmentSource::Swap, t0())
        .unwrap();
    let swap_id = outcome.record.unwrap().swap_id;

    let err = executor
        .rollback_at(&swap_id, "chief", t0() + ChronoDuration::hours(25))
        .unwrap_err();
    assert!(matches!(err, SchedulingError::RollbackWindowExpired { .. }));
    assert!(!repos.assignment_repo.find_by_id("C0").unwrap().unwrap().active);
}

#[test]
fn test_rollback_into_new_absence_fails_closed() {
    let (executor, repos) = executor_for(&heavy_month());
    let outcome = executor
        .execute_at(&hand_off("C0", "R4", "rb-3"), AssignmentSource::Swap, t0())
        .unwrap();
    let swap_id = outcome.record.unwrap().swap_id;

    repos
        .absence_repo
        .insert(&Absence {
            absence_id: "LATE".to_string(),
            person_id: "R3".to_string(),
            start_date: day(0),
            end_date: day(0),
            reason: Some("sick".to_string()),
        })
        .unwrap();

    let err = executor
        .rollback_at(&swap_id, "chief", t0() + ChronoDuration::hours(1))
        .unwrap_err();
    assert!(matches!(err, SchedulingError::HardConstraintViolation { .. }));
    assert_eq!(
        executor.get_swap(&swap_id).unwrap().unwrap().status,
        SwapStatus::Executed
    );
}

#[test]
fn test_held_lock_turns_into_conflict() {
    let scenario = heavy_month();
    let repos = memory_repos();
    scenario.seed(&repos);
    let locks = AssignmentLocks::new();
    let executor = SwapExecutor::new(repos, scenario.input.policy.clone(), Arc::clone(&locks))
        .with_lock_timeout(std::time::Duration::from_millis(20));

    let _held = locks
        .acquire(&["C0".to_string()], std::time::Duration::from_millis(10))
        .unwrap();
    let err = executor
        .execute_at(&hand_off("C0", "R4", "locked"), AssignmentSource::Swap, t0())
        .unwrap_err();
    assert!(matches!(err, SchedulingError::ConcurrencyConflict(_)));
}

#[test]
fn test_slot_lock_serializes_hand_offs_onto_one_person() {
    let scenario = heavy_month();
    let repos = memory_repos();
    scenario.seed(&repos);
    let locks = AssignmentLocks::new();
    let executor = SwapExecutor::new(repos, scenario.input.policy.clone(), Arc::clone(&locks))
        .with_lock_timeout(std::time::Duration::from_millis(20));

    // another request is filling R4's day-0 afternoon
    let slot = format!("slot:R4|{}", block_id(day(0), TimeOfDay::PM));
    let _held = locks.acquire(&[slot], std::time::Duration::from_millis(10)).unwrap();

    let err = executor
        .execute_at(&hand_off("C0", "R4", "slot-1"), AssignmentSource::Swap, t0())
        .unwrap_err();
    assert!(matches!(err, SchedulingError::ConcurrencyConflict(_)));

    // a different slot of another person proceeds
    let outcome = executor
        .execute_at(&hand_off("C1", "R3", "slot-2"), AssignmentSource::Swap, t0())
        .unwrap();
    assert!(outcome.executed());
}

#[test]
fn test_commit_rechecks_the_recipient_slot() {
    let (_executor, repos) = executor_for(&heavy_month());
    let clinic = block_id(day(0), TimeOfDay::PM);

    let taken: SchedulingResult<()> = repos.in_transaction(|tx| executor::ensure_slot_free(tx, "R3", &clinic));
    assert!(matches!(taken, Err(SchedulingError::ConcurrencyConflict(_))));
    let free: SchedulingResult<()> = repos.in_transaction(|tx| executor::ensure_slot_free(tx, "R4", &clinic));
    assert!(free.is_ok());
}

#[test]
fn test_record_keeps_post_swap_versions() {
    let (executor, _repos) = executor_for(&heavy_month());
    let outcome = executor
        .execute_at(&hand_off("C0", "R4", "ver-1"), AssignmentSource::Swap, t0())
        .unwrap();
    let change = &outcome.record.unwrap().changes[0];
    assert_eq!(change.old_version, Some(2));
    assert_eq!(change.new_version, Some(1));
}

#[test]
fn test_rollback_detects_edit_after_swap() {
    let (executor, repos) = executor_for(&heavy_month());
    let outcome = executor
        .execute_at(&hand_off("C0", "R4", "rb-edit"), AssignmentSource::Swap, t0())
        .unwrap();
    let swap_id = outcome.record.unwrap().swap_id;
    let new_id = &outcome.new_assignment_ids[0];

    // the new row is pinned and unpinned after the swap: still active, version moved
    repos.assignment_repo.set_locked(new_id, 1, true).unwrap();
    repos.assignment_repo.set_locked(new_id, 2, false).unwrap();

    let err = executor
        .rollback_at(&swap_id, "chief", t0() + ChronoDuration::hours(1))
        .unwrap_err();
    assert!(matches!(err, SchedulingError::ConcurrencyConflict(_)), "{:?}", err);
    assert!(!repos.assignment_repo.find_by_id("C0").unwrap().unwrap().active);
    assert_eq!(
        executor.get_swap(&swap_id).unwrap().unwrap().status,
        SwapStatus::Executed
    );
}
