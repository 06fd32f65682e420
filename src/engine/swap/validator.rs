// ==========================================
// SwapValidator - projects a change and checks the full post-state
// ==========================================
// Every hard constraint is evaluated on the complete projected schedule
// of the validation window. A violation blocks the change when it
// involves a person or a block the change touches. Never mutates.
// ==========================================

use super::{SwapDecision, SwapRequest, SwapTarget};
use crate::engine::constraints::{ConstraintRegistry, Violation};
use crate::engine::context::{LiveAssignment, Placement, SchedulingContext};
use crate::engine::error::{SchedulingError, SchedulingResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One assignment leaving the schedule and the placement replacing it.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedChange {
    pub removed: String,
    pub added: Placement,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SwapPlan {
    pub changes: Vec<PlannedChange>,
}

impl SwapPlan {
    pub fn removed_ids(&self) -> Vec<String> {
        self.changes.iter().map(|c| c.removed.clone()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapValidation {
    pub decision: SwapDecision,
    pub affected_person_ids: Vec<String>,
    pub affected_block_ids: Vec<String>,
    /// Hard violations anywhere in the projected window, relevant or not
    pub window_hard_violations: usize,
}

pub struct SwapValidator<'a> {
    ctx: &'a SchedulingContext,
    registry: &'a ConstraintRegistry,
}

impl<'a> SwapValidator<'a> {
    pub fn new(ctx: &'a SchedulingContext, registry: &'a ConstraintRegistry) -> Self {
        Self { ctx, registry }
    }

    /// Resolve a request against the snapshot.
    ///
    /// # Errors
    /// - `ConcurrencyConflict`: a version moved since the caller read it
    /// - `Validation`: inactive assignment, unknown slot or person, no-op
    pub fn plan(&self, request: &SwapRequest) -> SchedulingResult<SwapPlan> {
        let ctx = self.ctx;
        let source = self.live(&request.source_assignment_id, request.expected_version)?;
        let src = source.placement;

        let changes = match &request.target {
            SwapTarget::Exchange {
                assignment_id,
                expected_version,
            } => {
                let target = self.live(assignment_id, *expected_version)?;
                let tgt = target.placement;
                if tgt.person == src.person {
                    return Err(SchedulingError::Validation(format!(
                        "{} and {} belong to the same person",
                        request.source_assignment_id, assignment_id
                    )));
                }
                vec![
                    PlannedChange {
                        removed: request.source_assignment_id.clone(),
                        added: Placement::new(tgt.person, src.block, src.template),
                    },
                    PlannedChange {
                        removed: assignment_id.clone(),
                        added: Placement::new(src.person, tgt.block, tgt.template),
                    },
                ]
            }
            SwapTarget::MoveTo { block_id, template_id } => {
                let block = ctx.block_idx(block_id).ok_or_else(|| {
                    SchedulingError::Validation(format!("block {} is unknown or outside the window", block_id))
                })?;
                let template = ctx.template_idx(template_id).ok_or_else(|| {
                    SchedulingError::Validation(format!("template {} is unknown or inactive", template_id))
                })?;
                if block == src.block && template == src.template {
                    return Err(SchedulingError::Validation("move targets the current slot".to_string()));
                }
                vec![PlannedChange {
                    removed: request.source_assignment_id.clone(),
                    added: Placement::new(src.person, block, template),
                }]
            }
            SwapTarget::HandOff { person_id } => {
                let person = ctx.person_idx(person_id).ok_or_else(|| {
                    SchedulingError::Validation(format!("person {} is unknown or inactive", person_id))
                })?;
                if person == src.person {
                    return Err(SchedulingError::Validation(format!(
                        "{} already holds {}",
                        person_id, request.source_assignment_id
                    )));
                }
                vec![PlannedChange {
                    removed: request.source_assignment_id.clone(),
                    added: Placement::new(person, src.block, src.template),
                }]
            }
        };
        Ok(SwapPlan { changes })
    }

    /// Evaluate the projected schedule. Read-only.
    pub fn validate(&self, plan: &SwapPlan) -> SchedulingResult<SwapValidation> {
        let ctx = self.ctx;
        let removed: BTreeSet<&str> = plan.changes.iter().map(|c| c.removed.as_str()).collect();

        let mut persons: BTreeSet<usize> = BTreeSet::new();
        let mut blocks: BTreeSet<usize> = BTreeSet::new();
        for change in &plan.changes {
            let old = ctx
                .live_by_id(&change.removed)
                .ok_or_else(|| {
                    SchedulingError::Validation(format!("assignment {} is not active", change.removed))
                })?
                .placement;
            persons.extend([old.person, change.added.person]);
            blocks.extend([old.block, change.added.block]);
        }

        let before: Vec<Placement> = ctx.live_placements();
        let mut after: Vec<Placement> = ctx
            .live
            .iter()
            .filter(|l| !removed.contains(l.assignment_id.as_str()))
            .map(|l| l.placement)
            .collect();
        after.extend(plan.changes.iter().map(|c| c.added));

        let person_ids: BTreeSet<String> = persons.iter().map(|&p| ctx.people[p].person_id.clone()).collect();
        let block_ids: BTreeSet<String> = blocks.iter().map(|&b| ctx.blocks[b].block_id.clone()).collect();
        let relevant = |v: &Violation| match &v.person_id {
            Some(p) => person_ids.contains(p),
            None => v.block_id.as_ref().map_or(false, |b| block_ids.contains(b)),
        };

        let post = self.registry.evaluate(ctx, &after);
        let reasons: Vec<Violation> = post.hard.iter().filter(|v| relevant(v)).cloned().collect();

        let decision = if !reasons.is_empty() {
            SwapDecision::Blocked { reasons }
        } else {
            let pre_keys: BTreeSet<String> = self
                .registry
                .evaluate(ctx, &before)
                .soft
                .iter()
                .map(|v| v.key())
                .collect();
            let warnings: Vec<Violation> = post
                .soft
                .iter()
                .filter(|v| relevant(v) && !pre_keys.contains(&v.key()))
                .cloned()
                .collect();
            if warnings.is_empty() {
                SwapDecision::Allowed
            } else {
                SwapDecision::AllowedWithWarnings { warnings }
            }
        };

        Ok(SwapValidation {
            decision,
            affected_person_ids: person_ids.into_iter().collect(),
            affected_block_ids: block_ids.into_iter().collect(),
            window_hard_violations: post.hard.len(),
        })
    }

    fn live(&self, assignment_id: &str, expected_version: i32) -> SchedulingResult<&LiveAssignment> {
        let live = self.ctx.live_by_id(assignment_id).ok_or_else(|| {
            SchedulingError::Validation(format!("assignment {} is not active", assignment_id))
        })?;
        if live.version != expected_version {
            return Err(SchedulingError::ConcurrencyConflict(format!(
                "assignment {} is at version {}, request validated against {}",
                assignment_id, live.version, expected_version
            )));
        }
        Ok(live)
    }
}
