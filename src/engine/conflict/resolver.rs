// ==========================================
// ConflictResolver - fixed-priority remediation
// ==========================================
// Strategies in order: idle eligible substitute (hand-off), exchange with
// another person's assignment, escalate. Every candidate passes the swap
// validator on the full post-state. A fix is applied only when it is
// allowed, confident enough and does not touch a keystone resource;
// everything else is left as a proposal for review.
// ==========================================

use crate::domain::assignment::Assignment;
use crate::domain::conflict::ConflictRecord;
use crate::domain::types::{AssignmentSource, ConflictType, ResolutionStatus};
use crate::engine::constraints::ConstraintRegistry;
use crate::engine::context::{LiveAssignment, SchedulingContext};
use crate::engine::error::{SchedulingError, SchedulingResult};
use crate::engine::events::{OptionalEventPublisher, ScheduleEvent, ScheduleEventType};
use crate::engine::repositories::ScheduleRepositories;
use crate::engine::swap::{SwapDecision, SwapExecutor, SwapRequest, SwapTarget, SwapValidator};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

const RESOLVER_ACTOR: &str = "conflict-resolver";
const SUBSTITUTE_CONFIDENCE: f64 = 0.9;
const EXCHANGE_CONFIDENCE: f64 = 0.75;
const WARNING_PENALTY: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    Substitute,
    Exchange,
    Escalate,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::Substitute => "substitute",
            ResolutionStrategy::Exchange => "exchange",
            ResolutionStrategy::Escalate => "escalate",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionOutcome {
    pub conflict_id: String,
    pub status: ResolutionStatus,
    pub strategy: ResolutionStrategy,
    /// Swap that would fix the conflict (applied when AUTO_RESOLVED)
    pub proposal: Option<SwapRequest>,
    pub confidence: f64,
    pub keystone: bool,
    pub swap_id: Option<String>,
    pub detail: String,
}

struct Candidate {
    strategy: ResolutionStrategy,
    request: SwapRequest,
    confidence: f64,
}

pub struct ConflictResolver {
    repos: ScheduleRepositories,
    executor: Arc<SwapExecutor>,
    events: OptionalEventPublisher,
}

impl ConflictResolver {
    pub fn new(repos: ScheduleRepositories, executor: Arc<SwapExecutor>) -> Self {
        Self {
            repos,
            executor,
            events: OptionalEventPublisher::none(),
        }
    }

    pub fn with_events(mut self, events: OptionalEventPublisher) -> Self {
        self.events = events;
        self
    }

    pub fn resolve(&self, conflict_id: &str) -> SchedulingResult<ResolutionOutcome> {
        self.resolve_at(conflict_id, chrono::Utc::now().naive_utc())
    }

    /// Try every open conflict, most severe first.
    pub fn resolve_open(&self, now: NaiveDateTime) -> SchedulingResult<Vec<ResolutionOutcome>> {
        let open = self.repos.conflict_repo.list_open()?;
        let mut outcomes = Vec::with_capacity(open.len());
        for record in open {
            match self.resolve_record(&record, now) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(conflict_id = %record.conflict_id, error = %e, "conflict left open, state moved");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(outcomes)
    }

    pub fn resolve_at(&self, conflict_id: &str, now: NaiveDateTime) -> SchedulingResult<ResolutionOutcome> {
        let record = self
            .repos
            .conflict_repo
            .find_by_id(conflict_id)?
            .ok_or_else(|| SchedulingError::NotFound {
                entity: "ConflictRecord".to_string(),
                id: conflict_id.to_string(),
            })?;
        if !record.is_open() {
            return Err(SchedulingError::Validation(format!(
                "conflict {} is already {}",
                conflict_id,
                record.resolution_status.to_db_str()
            )));
        }
        self.resolve_record(&record, now)
    }

    #[instrument(skip_all, fields(conflict_id = %record.conflict_id, kind = %record.conflict_type))]
    fn resolve_record(&self, record: &ConflictRecord, now: NaiveDateTime) -> SchedulingResult<ResolutionOutcome> {
        let Some(focal) = self.focal_assignment(record)? else {
            return self.finish(record, escalation(record, "no single assignment can be moved to clear it"));
        };

        let ctx = self.executor.load_window(&[focal.block_id.clone()])?;
        let Some(live) = ctx.live_by_id(&focal.assignment_id).cloned() else {
            return self.finish(record, escalation(record, "focal assignment is outside the live schedule"));
        };
        let registry = ConstraintRegistry::standard(self.executor.policy());
        let key = format!("resolve:{}", record.conflict_id);

        let candidate = find_substitute(&ctx, &registry, &live, &key)
            .or_else(|| find_exchange(&ctx, &registry, &live, &key));
        let Some(candidate) = candidate else {
            return self.finish(record, escalation(record, "no substitute or exchange passes validation"));
        };

        let keystone = is_keystone(&ctx, &live);
        let min_confidence = self.executor.policy().conflict.auto_resolve_min_confidence;
        let mut outcome = ResolutionOutcome {
            conflict_id: record.conflict_id.clone(),
            status: ResolutionStatus::ProposedForReview,
            strategy: candidate.strategy,
            proposal: Some(candidate.request.clone()),
            confidence: candidate.confidence,
            keystone,
            swap_id: None,
            detail: String::new(),
        };

        if keystone {
            outcome.detail = "keystone resource, human review required".to_string();
        } else if candidate.confidence < min_confidence {
            outcome.detail = format!(
                "confidence {:.2} below auto-resolve threshold {:.2}",
                candidate.confidence, min_confidence
            );
        } else {
            let applied = self
                .executor
                .execute_at(&candidate.request, AssignmentSource::Resolver, now)?;
            match applied.record {
                Some(swap) => {
                    outcome.status = ResolutionStatus::AutoResolved;
                    outcome.detail = format!("{} applied", candidate.strategy.as_str());
                    outcome.swap_id = Some(swap.swap_id);
                }
                None => {
                    outcome.detail = format!(
                        "validation changed at commit time: {:?}",
                        applied.decision.blocked_codes()
                    );
                }
            }
        }
        self.finish(record, outcome)
    }

    /// Assignment whose removal would clear the conflict: the latest active
    /// row of the conflicted person. Gaps and cascades have none.
    fn focal_assignment(&self, record: &ConflictRecord) -> SchedulingResult<Option<Assignment>> {
        match record.conflict_type {
            ConflictType::DoubleBooking
            | ConflictType::HourViolation
            | ConflictType::RestViolation
            | ConflictType::AbsenceConflict
            | ConflictType::CredentialViolation => {}
            ConflictType::SupervisionGap | ConflictType::CoverageGap | ConflictType::Cascading => return Ok(None),
        }
        let Some(person_id) = record.person_id.as_deref() else {
            return Ok(None);
        };
        for id in record.affected_assignment_ids.iter().rev() {
            if let Some(a) = self.repos.assignment_repo.find_by_id(id)? {
                if a.active && a.person_id == person_id {
                    return Ok(Some(a));
                }
            }
        }
        Ok(None)
    }

    fn finish(&self, record: &ConflictRecord, outcome: ResolutionOutcome) -> SchedulingResult<ResolutionOutcome> {
        let detail = serde_json::json!({
            "strategy": outcome.strategy,
            "confidence": outcome.confidence,
            "keystone": outcome.keystone,
            "reason": outcome.detail,
            "proposal": outcome.proposal,
        })
        .to_string();
        self.repos.conflict_repo.update_resolution(
            &record.conflict_id,
            outcome.status,
            Some(&detail),
            outcome.swap_id.as_deref(),
        )?;

        tracing::info!(
            status = outcome.status.to_db_str(),
            strategy = outcome.strategy.as_str(),
            confidence = outcome.confidence,
            keystone = outcome.keystone,
            "conflict handled"
        );
        self.events.notify(
            ScheduleEvent::new(&record.conflict_id, ScheduleEventType::ConflictResolved, "conflict-resolver")
                .people(record.person_id.iter().cloned().collect()),
        );
        Ok(outcome)
    }
}

fn escalation(record: &ConflictRecord, reason: &str) -> ResolutionOutcome {
    ResolutionOutcome {
        conflict_id: record.conflict_id.clone(),
        status: ResolutionStatus::Escalated,
        strategy: ResolutionStrategy::Escalate,
        proposal: None,
        confidence: 0.0,
        keystone: false,
        swap_id: None,
        detail: reason.to_string(),
    }
}

fn confidence_of(decision: &SwapDecision, base: f64) -> Option<f64> {
    match decision {
        SwapDecision::Allowed => Some(base),
        SwapDecision::AllowedWithWarnings { .. } => Some(base - WARNING_PENALTY),
        SwapDecision::Blocked { .. } => None,
    }
}

fn screen(ctx: &SchedulingContext, registry: &ConstraintRegistry, request: &SwapRequest) -> Option<SwapDecision> {
    let validator = SwapValidator::new(ctx, registry);
    let plan = validator.plan(request).ok()?;
    validator.validate(&plan).ok().map(|v| v.decision)
}

/// Idle eligible people who can take the slot; the cleanest fit wins.
fn find_substitute(
    ctx: &SchedulingContext,
    registry: &ConstraintRegistry,
    live: &LiveAssignment,
    key: &str,
) -> Option<Candidate> {
    let slot = live.placement;
    let mut best: Option<Candidate> = None;
    for (p, person) in ctx.people.iter().enumerate() {
        if p == slot.person || !ctx.is_candidate(p, slot.block, slot.template) {
            continue;
        }
        let busy = ctx
            .live
            .iter()
            .any(|l| l.placement.person == p && l.placement.block == slot.block);
        if busy {
            continue;
        }
        let request = SwapRequest {
            source_assignment_id: live.assignment_id.clone(),
            expected_version: live.version,
            target: SwapTarget::HandOff {
                person_id: person.person_id.clone(),
            },
            idempotency_key: key.to_string(),
            actor: RESOLVER_ACTOR.to_string(),
        };
        let Some(confidence) = screen(ctx, registry, &request).and_then(|d| confidence_of(&d, SUBSTITUTE_CONFIDENCE))
        else {
            continue;
        };
        if best.as_ref().map_or(true, |b| confidence > b.confidence) {
            best = Some(Candidate {
                strategy: ResolutionStrategy::Substitute,
                request,
                confidence,
            });
        }
        if confidence >= SUBSTITUTE_CONFIDENCE {
            break;
        }
    }
    best
}

/// Trade the slot for another person's assignment both sides can hold.
fn find_exchange(
    ctx: &SchedulingContext,
    registry: &ConstraintRegistry,
    live: &LiveAssignment,
    key: &str,
) -> Option<Candidate> {
    let slot = live.placement;
    for other in &ctx.live {
        let o = other.placement;
        if o.person == slot.person
            || other.locked
            || !ctx.is_candidate(o.person, slot.block, slot.template)
            || !ctx.is_candidate(slot.person, o.block, o.template)
        {
            continue;
        }
        let request = SwapRequest {
            source_assignment_id: live.assignment_id.clone(),
            expected_version: live.version,
            target: SwapTarget::Exchange {
                assignment_id: other.assignment_id.clone(),
                expected_version: other.version,
            },
            idempotency_key: key.to_string(),
            actor: RESOLVER_ACTOR.to_string(),
        };
        if let Some(confidence) = screen(ctx, registry, &request).and_then(|d| confidence_of(&d, EXCHANGE_CONFIDENCE)) {
            return Some(Candidate {
                strategy: ResolutionStrategy::Exchange,
                request,
                confidence,
            });
        }
    }
    None
}

/// Low-redundancy resource: few qualified alternates for the template, or
/// the only faculty supervising interns in the cell.
fn is_keystone(ctx: &SchedulingContext, live: &LiveAssignment) -> bool {
    let slot = live.placement;
    let alternates = (0..ctx.people.len())
        .filter(|&p| p != slot.person && ctx.ineligibility(p, slot.template).is_none())
        .count();
    if alternates as u32 <= ctx.policy.conflict.keystone_redundancy {
        return true;
    }

    if !ctx.people[slot.person].is_faculty() {
        return false;
    }
    let cell: Vec<usize> = ctx
        .live
        .iter()
        .filter(|l| l.placement.block == slot.block && l.placement.template == slot.template)
        .map(|l| l.placement.person)
        .collect();
    let faculty = cell.iter().filter(|&&p| ctx.people[p].is_faculty()).count();
    let interns = cell.iter().filter(|&&p| ctx.people[p].is_intern()).count();
    faculty == 1 && interns > 0
}
