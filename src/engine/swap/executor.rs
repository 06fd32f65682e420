// ==========================================
// SwapExecutor - atomic swap commit, idempotent replay, rollback
// ==========================================

use super::locks::{AssignmentLockGuard, AssignmentLocks};
use super::validator::{PlannedChange, SwapPlan, SwapValidation, SwapValidator};
use super::{SwapDecision, SwapRequest};
use crate::config::SchedulingPolicy;
use crate::domain::assignment::Assignment;
use crate::domain::swap::{SupersededPair, SwapRecord};
use crate::domain::types::{AssignmentSource, SwapStatus};
use crate::engine::constraints::ConstraintRegistry;
use crate::engine::context::{ContextLoader, Placement, SchedulingContext};
use crate::engine::error::{SchedulingError, SchedulingResult};
use crate::engine::events::{OptionalEventPublisher, ScheduleEvent, ScheduleEventType};
use crate::engine::repositories::ScheduleRepositories;
use crate::repository::{AssignmentRepository, RepositoryError, SwapRecordRepository};
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapOutcome {
    pub decision: SwapDecision,
    /// None when BLOCKED
    pub record: Option<SwapRecord>,
    /// The idempotency key matched an earlier execution
    pub replayed: bool,
    pub new_assignment_ids: Vec<String>,
}

impl SwapOutcome {
    pub fn executed(&self) -> bool {
        self.record.is_some()
    }

    fn replay(record: SwapRecord) -> Self {
        Self {
            decision: SwapDecision::from_label(&record.decision),
            new_assignment_ids: record
                .changes
                .iter()
                .filter_map(|c| c.new_assignment_id.clone())
                .collect(),
            record: Some(record),
            replayed: true,
        }
    }
}

pub struct SwapExecutor {
    repos: ScheduleRepositories,
    policy: SchedulingPolicy,
    locks: Arc<AssignmentLocks>,
    events: OptionalEventPublisher,
    lock_timeout: Duration,
}

impl SwapExecutor {
    pub fn new(repos: ScheduleRepositories, policy: SchedulingPolicy, locks: Arc<AssignmentLocks>) -> Self {
        Self {
            repos,
            policy,
            locks,
            events: OptionalEventPublisher::none(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_events(mut self, events: OptionalEventPublisher) -> Self {
        self.events = events;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn policy(&self) -> &SchedulingPolicy {
        &self.policy
    }

    // ==========================================
    // Validation (dry run)
    // ==========================================

    /// Project the swap and evaluate every hard constraint on the
    /// post-state. Writes nothing.
    pub fn validate_swap(&self, request: &SwapRequest) -> SchedulingResult<SwapValidation> {
        request.validate()?;
        let scope = self.request_scope(request)?;
        let ctx = self.load_window(&scope.block_ids)?;
        let registry = ConstraintRegistry::standard(&self.policy);
        let validator = SwapValidator::new(&ctx, &registry);
        let plan = validator.plan(request)?;
        validator.validate(&plan)
    }

    // ==========================================
    // Execution
    // ==========================================

    pub fn execute_swap(&self, request: &SwapRequest) -> SchedulingResult<SwapOutcome> {
        self.execute_at(request, AssignmentSource::Swap, chrono::Utc::now().naive_utc())
    }

    /// Execute with an explicit clock and row source (conflict resolver,
    /// tests).
    #[instrument(skip_all, fields(source = %request.source_assignment_id, key = %request.idempotency_key))]
    pub fn execute_at(
        &self,
        request: &SwapRequest,
        source: AssignmentSource,
        now: NaiveDateTime,
    ) -> SchedulingResult<SwapOutcome> {
        request.validate()?;
        let target_json = request.target_json()?;

        if let Some(existing) = self.repos.swap_repo.find_by_idempotency_key(&request.idempotency_key)? {
            return self.replay(request, &target_json, existing);
        }

        // snapshot and validation happen under the lock
        let scope = self.request_scope(request)?;
        let _guard = self.lock(&scope.keys())?;

        let ctx = self.load_window(&scope.block_ids)?;
        let registry = ConstraintRegistry::standard(&self.policy);
        let validator = SwapValidator::new(&ctx, &registry);
        let plan = validator.plan(request)?;
        let validation = validator.validate(&plan)?;

        if let SwapDecision::Blocked { reasons } = &validation.decision {
            tracing::warn!(
                codes = ?validation.decision.blocked_codes(),
                reasons = reasons.len(),
                "swap blocked, nothing changed"
            );
            return Ok(SwapOutcome {
                decision: validation.decision,
                record: None,
                replayed: false,
                new_assignment_ids: Vec::new(),
            });
        }

        let rows = new_rows(&ctx, &plan, source, &format!("{} by {}", request.target.kind(), request.actor));
        let warnings = match &validation.decision {
            SwapDecision::AllowedWithWarnings { warnings } => warnings.iter().map(|v| v.message.clone()).collect(),
            _ => Vec::new(),
        };
        let record = SwapRecord {
            swap_id: uuid::Uuid::new_v4().to_string(),
            idempotency_key: request.idempotency_key.clone(),
            source_assignment_id: request.source_assignment_id.clone(),
            target_json,
            person_ids: validation.affected_person_ids.clone(),
            changes: plan
                .changes
                .iter()
                .zip(rows.iter())
                .map(|(c, row)| SupersededPair {
                    old_assignment_id: Some(c.removed.clone()),
                    new_assignment_id: Some(row.assignment_id.clone()),
                    old_version: ctx.live_by_id(&c.removed).map(|l| l.version + 1),
                    new_version: Some(row.version),
                })
                .collect(),
            decision: validation.decision.label().to_string(),
            warnings,
            status: SwapStatus::Executed,
            executed_at: now,
            rollback_deadline: now + ChronoDuration::hours(self.policy.rollback_window_hours),
            rolled_back_at: None,
            actor: request.actor.clone(),
        };

        let committed = self.repos.in_transaction(|tx| {
            for (change, row) in plan.changes.iter().zip(rows.iter()) {
                let version = ctx
                    .live_by_id(&change.removed)
                    .map(|l| l.version)
                    .ok_or_else(|| SchedulingError::Validation(format!("assignment {} vanished", change.removed)))?;
                AssignmentRepository::supersede_with(tx, &change.removed, version, Some(&row.assignment_id))?;
            }
            // writers outside the lock table (generation, manual edits)
            for row in &rows {
                ensure_slot_free(tx, &row.person_id, &row.block_id)?;
                AssignmentRepository::insert_with(tx, row)?;
            }
            SwapRecordRepository::insert_with(tx, &record)?;
            Ok::<(), SchedulingError>(())
        });

        match committed {
            Ok(()) => {}
            Err(SchedulingError::Repository(RepositoryError::UniqueConstraintViolation(msg))) => {
                // a concurrent request with the same key won
                tracing::info!(detail = %msg, "idempotency key committed concurrently");
                let existing = self
                    .repos
                    .swap_repo
                    .find_by_idempotency_key(&request.idempotency_key)?
                    .ok_or_else(|| SchedulingError::ConcurrencyConflict(msg.clone()))?;
                return self.replay(request, &record.target_json, existing);
            }
            Err(e) => {
                tracing::warn!(error = %e, "swap transaction rolled back");
                return Err(e);
            }
        }

        tracing::info!(
            swap_id = %record.swap_id,
            decision = record.decision.as_str(),
            people = ?record.person_ids,
            "swap executed"
        );
        let (start, end) = date_span(&ctx, &plan);
        self.events.notify(
            ScheduleEvent::new(&record.swap_id, ScheduleEventType::SwapExecuted, "swap")
                .people(record.person_ids.clone())
                .dates(start, end),
        );

        Ok(SwapOutcome {
            decision: validation.decision,
            new_assignment_ids: rows.into_iter().map(|r| r.assignment_id).collect(),
            record: Some(record),
            replayed: false,
        })
    }

    fn replay(&self, request: &SwapRequest, target_json: &str, existing: SwapRecord) -> SchedulingResult<SwapOutcome> {
        if existing.source_assignment_id != request.source_assignment_id || existing.target_json != target_json {
            return Err(SchedulingError::Validation(format!(
                "idempotency key {} was already used for a different swap",
                request.idempotency_key
            )));
        }
        tracing::info!(swap_id = %existing.swap_id, "swap replayed from idempotency key");
        Ok(SwapOutcome::replay(existing))
    }

    // ==========================================
    // Rollback
    // ==========================================

    pub fn rollback_swap(&self, swap_id: &str, actor: &str) -> SchedulingResult<SwapRecord> {
        self.rollback_at(swap_id, actor, chrono::Utc::now().naive_utc())
    }

    /// Revert an executed swap inside its rollback window.
    ///
    /// # Errors
    /// - `RollbackWindowExpired`: past the deadline (no admin override)
    /// - `HardConstraintViolation`: the reverted state breaks a hard rule
    /// - `ConcurrencyConflict`: a swapped row changed since execution
    #[instrument(skip_all, fields(swap_id = %swap_id))]
    pub fn rollback_at(&self, swap_id: &str, actor: &str, now: NaiveDateTime) -> SchedulingResult<SwapRecord> {
        let record = self
            .repos
            .swap_repo
            .find_by_id(swap_id)?
            .ok_or_else(|| SchedulingError::NotFound {
                entity: "SwapRecord".to_string(),
                id: swap_id.to_string(),
            })?;
        if record.status == SwapStatus::RolledBack {
            return Err(SchedulingError::Validation(format!("swap {} is already rolled back", swap_id)));
        }
        if !record.can_rollback_at(now) {
            return Err(SchedulingError::RollbackWindowExpired {
                swap_id: swap_id.to_string(),
                deadline: record.rollback_deadline,
            });
        }

        // rows never change person or block, so the scope can be read before locking
        let mut scope = LockScope::default();
        for change in &record.changes {
            let (Some(new_id), Some(old_id)) = (&change.new_assignment_id, &change.old_assignment_id) else {
                continue;
            };
            let current = self.find_assignment(new_id)?;
            let original = self.find_assignment(old_id)?;
            scope.assignment(&current);
            scope.fill(&original.person_id, &original.block_id);
            scope.assignment(&original);
        }
        let _guard = self.lock(&scope.keys())?;

        let mut pairs: Vec<(Assignment, Assignment)> = Vec::new(); // (current, original)
        for change in &record.changes {
            let (Some(new_id), Some(old_id)) = (&change.new_assignment_id, &change.old_assignment_id) else {
                continue;
            };
            let current = self.find_assignment(new_id)?;
            let original = self.find_assignment(old_id)?;
            if !current.active || original.active {
                return Err(SchedulingError::ConcurrencyConflict(format!(
                    "assignment {} changed after swap {}",
                    if current.active { old_id } else { new_id },
                    swap_id
                )));
            }
            for (row, recorded) in [(&current, change.new_version), (&original, change.old_version)] {
                if let Some(expected) = recorded {
                    if row.version != expected {
                        return Err(SchedulingError::ConcurrencyConflict(format!(
                            "assignment {} is at version {}, swap {} left it at {}",
                            row.assignment_id, row.version, swap_id, expected
                        )));
                    }
                }
            }
            pairs.push((current, original));
        }

        let block_ids: Vec<String> = pairs
            .iter()
            .flat_map(|(c, o)| [c.block_id.clone(), o.block_id.clone()])
            .collect();
        let ctx = self.load_window(&block_ids)?;
        let registry = ConstraintRegistry::standard(&self.policy);

        let mut plan = SwapPlan::default();
        for (current, original) in &pairs {
            plan.changes.push(PlannedChange {
                removed: current.assignment_id.clone(),
                added: placement_of(&ctx, original)?,
            });
        }
        let validation = SwapValidator::new(&ctx, &registry).validate(&plan)?;
        if let SwapDecision::Blocked { reasons } = validation.decision {
            tracing::warn!(
                violations = reasons.len(),
                "rollback would break a hard constraint, refused"
            );
            return Err(SchedulingError::HardConstraintViolation { violations: reasons });
        }

        self.repos.in_transaction(|tx| {
            for (current, _) in &pairs {
                AssignmentRepository::supersede_with(tx, &current.assignment_id, current.version, None)?;
            }
            for (_, original) in &pairs {
                ensure_slot_free(tx, &original.person_id, &original.block_id)?;
                AssignmentRepository::reactivate_with(tx, &original.assignment_id, original.version)?;
            }
            SwapRecordRepository::mark_rolled_back_with(tx, swap_id, now)?;
            Ok::<(), SchedulingError>(())
        })?;

        tracing::info!(actor = %actor, "swap rolled back");
        let (start, end) = date_span(&ctx, &plan);
        self.events.notify(
            ScheduleEvent::new(swap_id, ScheduleEventType::SwapRolledBack, "swap")
                .people(record.person_ids.clone())
                .dates(start, end),
        );

        self.repos
            .swap_repo
            .find_by_id(swap_id)?
            .ok_or_else(|| SchedulingError::NotFound {
                entity: "SwapRecord".to_string(),
                id: swap_id.to_string(),
            })
    }

    // ==========================================
    // Queries
    // ==========================================

    pub fn get_swap(&self, swap_id: &str) -> SchedulingResult<Option<SwapRecord>> {
        Ok(self.repos.swap_repo.find_by_id(swap_id)?)
    }

    pub fn list_swaps_for_person(&self, person_id: &str) -> SchedulingResult<Vec<SwapRecord>> {
        Ok(self.repos.swap_repo.list_for_person(person_id)?)
    }

    // ==========================================
    // Helpers
    // ==========================================

    fn lock(&self, keys: &[String]) -> SchedulingResult<AssignmentLockGuard> {
        self.locks.acquire(keys, self.lock_timeout).ok_or_else(|| {
            SchedulingError::ConcurrencyConflict(format!("{:?} are being changed by another request", keys))
        })
    }

    fn find_assignment(&self, assignment_id: &str) -> SchedulingResult<Assignment> {
        self.repos
            .assignment_repo
            .find_by_id(assignment_id)?
            .ok_or_else(|| SchedulingError::NotFound {
                entity: "Assignment".to_string(),
                id: assignment_id.to_string(),
            })
    }

    /// Lock keys and blocks of a request, read from the store.
    fn request_scope(&self, request: &SwapRequest) -> SchedulingResult<LockScope> {
        let source = self.find_assignment(&request.source_assignment_id)?;
        let mut scope = LockScope::default();
        scope.assignment(&source);
        match &request.target {
            super::SwapTarget::Exchange { assignment_id, .. } => {
                let other = self.find_assignment(assignment_id)?;
                scope.assignment(&other);
                scope.fill(&other.person_id, &source.block_id);
                scope.fill(&source.person_id, &other.block_id);
            }
            super::SwapTarget::MoveTo { block_id, .. } => scope.fill(&source.person_id, block_id),
            super::SwapTarget::HandOff { person_id } => scope.fill(person_id, &source.block_id),
        }
        Ok(scope)
    }

    /// Snapshot covering every rolling window that contains one of the
    /// blocks: history before the first date, and one window length after
    /// the last.
    pub(crate) fn load_window(&self, block_ids: &[String]) -> SchedulingResult<SchedulingContext> {
        let mut dates: BTreeSet<NaiveDate> = BTreeSet::new();
        for id in block_ids {
            let block = self.repos.block_repo.find_by_id(id)?.ok_or_else(|| SchedulingError::NotFound {
                entity: "Block".to_string(),
                id: id.clone(),
            })?;
            dates.insert(block.date);
        }
        let (Some(&first), Some(&last)) = (dates.first(), dates.last()) else {
            return Err(SchedulingError::Validation("swap touches no block".to_string()));
        };
        let reach = self.policy.longest_window_days() as i64;
        let end = last + ChronoDuration::days((reach - 1).max(0));
        ContextLoader::new(&self.repos).load(first, end, &self.policy, BTreeSet::new())
    }
}

/// Lock-table keys of one change: the assignments it supersedes, the
/// (person, block) slots it fills, and every person and block whose
/// rolling windows or cell counts move.
#[derive(Debug, Default)]
struct LockScope {
    keys: BTreeSet<String>,
    block_ids: Vec<String>,
}

impl LockScope {
    fn assignment(&mut self, a: &Assignment) {
        self.keys.insert(a.assignment_id.clone());
        self.touch(&a.person_id, &a.block_id);
    }

    fn fill(&mut self, person_id: &str, block_id: &str) {
        self.keys.insert(format!("slot:{}|{}", person_id, block_id));
        self.touch(person_id, block_id);
    }

    fn touch(&mut self, person_id: &str, block_id: &str) {
        self.keys.insert(format!("person:{}", person_id));
        self.keys.insert(format!("block:{}", block_id));
        if !self.block_ids.iter().any(|b| b == block_id) {
            self.block_ids.push(block_id.to_string());
        }
    }

    fn keys(&self) -> Vec<String> {
        self.keys.iter().cloned().collect()
    }
}

/// Fails the transaction when the person already holds an active row in
/// the block.
pub(super) fn ensure_slot_free(tx: &Connection, person_id: &str, block_id: &str) -> SchedulingResult<()> {
    if AssignmentRepository::count_active_for_person_block_with(tx, person_id, block_id)? > 0 {
        return Err(SchedulingError::ConcurrencyConflict(format!(
            "{} already holds an assignment in block {}",
            person_id, block_id
        )));
    }
    Ok(())
}

/// Fresh rows for the placements a plan adds, inheriting the lock flag of
/// the row each replaces.
fn new_rows(ctx: &SchedulingContext, plan: &SwapPlan, source: AssignmentSource, rationale: &str) -> Vec<Assignment> {
    plan.changes
        .iter()
        .map(|c| {
            let p = c.added;
            let mut row = Assignment::new(
                &ctx.people[p.person].person_id,
                &ctx.blocks[p.block].block_id,
                &ctx.templates[p.template].template_id,
                source,
            )
            .with_rationale(rationale, 1.0);
            row.locked = ctx.live_by_id(&c.removed).map_or(false, |l| l.locked);
            row
        })
        .collect()
}

fn placement_of(ctx: &SchedulingContext, a: &Assignment) -> SchedulingResult<Placement> {
    match (ctx.person_idx(&a.person_id), ctx.block_idx(&a.block_id), ctx.template_idx(&a.template_id)) {
        (Some(p), Some(b), Some(t)) => Ok(Placement::new(p, b, t)),
        _ => Err(SchedulingError::Validation(format!(
            "assignment {} no longer maps onto the roster, calendar or templates",
            a.assignment_id
        ))),
    }
}

fn date_span(ctx: &SchedulingContext, plan: &SwapPlan) -> (NaiveDate, NaiveDate) {
    let dates: BTreeSet<NaiveDate> = plan
        .changes
        .iter()
        .map(|c| ctx.blocks[c.added.block].date)
        .collect();
    match (dates.first(), dates.last()) {
        (Some(&a), Some(&b)) => (a, b),
        _ => (ctx.start_date, ctx.start_date),
    }
}
