// ==========================================
// ConflictDetector - hard-constraint rescan of the committed schedule
// ==========================================

use crate::config::SchedulingPolicy;
use crate::domain::conflict::ConflictRecord;
use crate::domain::types::{ConflictType, ResolutionStatus, Severity};
use crate::engine::constraints::{codes, ConstraintRegistry};
use crate::engine::context::{ContextLoader, SchedulingContext};
use crate::engine::error::{SchedulingError, SchedulingResult};
use crate::engine::events::{OptionalEventPublisher, ScheduleEvent, ScheduleEventType};
use crate::engine::repositories::ScheduleRepositories;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::instrument;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictReport {
    pub scanned_at: NaiveDateTime,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Stored state of every conflict found by this scan
    pub conflicts: Vec<ConflictRecord>,
    pub new_count: usize,
    pub existing_count: usize,
}

impl ConflictReport {
    pub fn open(&self) -> impl Iterator<Item = &ConflictRecord> {
        self.conflicts.iter().filter(|c| c.is_open())
    }

    pub fn count_of(&self, conflict_type: ConflictType) -> usize {
        self.conflicts
            .iter()
            .filter(|c| c.conflict_type == conflict_type)
            .count()
    }
}

/// Conflict type for a hard constraint code; None for soft codes.
pub fn conflict_type_for(constraint: &str) -> Option<ConflictType> {
    match constraint {
        codes::DOUBLE_BOOKING => Some(ConflictType::DoubleBooking),
        codes::WORK_HOUR_VIOLATION => Some(ConflictType::HourViolation),
        codes::REST_VIOLATION => Some(ConflictType::RestViolation),
        codes::SUPERVISION => Some(ConflictType::SupervisionGap),
        codes::ABSENCE => Some(ConflictType::AbsenceConflict),
        codes::COVERAGE | codes::CAPACITY => Some(ConflictType::CoverageGap),
        codes::ELIGIBILITY => Some(ConflictType::CredentialViolation),
        _ => None,
    }
}

pub struct ConflictDetector {
    repos: ScheduleRepositories,
    policy: SchedulingPolicy,
    events: OptionalEventPublisher,
}

impl ConflictDetector {
    pub fn new(repos: ScheduleRepositories, policy: SchedulingPolicy) -> Self {
        Self {
            repos,
            policy,
            events: OptionalEventPublisher::none(),
        }
    }

    pub fn with_events(mut self, events: OptionalEventPublisher) -> Self {
        self.events = events;
        self
    }

    /// Classify every hard violation of the live schedule in `ctx`.
    ///
    /// Pure: ids are fresh, fingerprints are stable. A person with
    /// conflicts of two or more distinct types gets an extra `cascading`
    /// record.
    pub fn detect(ctx: &SchedulingContext, registry: &ConstraintRegistry, now: NaiveDateTime) -> Vec<ConflictRecord> {
        let live = ctx.live_placements();
        let eval = registry.evaluate(ctx, &live);

        let mut records: Vec<ConflictRecord> = Vec::new();
        for v in &eval.hard {
            let Some(conflict_type) = conflict_type_for(&v.constraint) else {
                continue;
            };
            let mut affected: Vec<String> = v
                .placements
                .iter()
                .filter_map(|&i| ctx.live.get(i).map(|l| l.assignment_id.clone()))
                .collect();
            affected.dedup();
            records.push(ConflictRecord {
                conflict_id: uuid::Uuid::new_v4().to_string(),
                fingerprint: format!("{}|{}", conflict_type, v.key()),
                conflict_type,
                severity: v.severity,
                person_id: v.person_id.clone(),
                affected_assignment_ids: affected,
                description: v.message.clone(),
                detected_at: now,
                resolution_status: ResolutionStatus::Open,
                resolution_detail: None,
                swap_id: None,
            });
        }

        let mut by_person: BTreeMap<&str, Vec<&ConflictRecord>> = BTreeMap::new();
        for r in &records {
            if let Some(p) = r.person_id.as_deref() {
                by_person.entry(p).or_default().push(r);
            }
        }
        let mut cascading = Vec::new();
        for (person, found) in by_person {
            let types: BTreeSet<ConflictType> = found.iter().map(|r| r.conflict_type).collect();
            if types.len() < 2 {
                continue;
            }
            let affected: BTreeSet<String> = found
                .iter()
                .flat_map(|r| r.affected_assignment_ids.iter().cloned())
                .collect();
            let labels: Vec<&str> = types.iter().map(|t| t.to_db_str()).collect();
            cascading.push(ConflictRecord {
                conflict_id: uuid::Uuid::new_v4().to_string(),
                fingerprint: format!("cascading|{}|{}", person, labels.join("+")),
                conflict_type: ConflictType::Cascading,
                severity: found.iter().map(|r| r.severity).max().unwrap_or(Severity::Medium),
                person_id: Some(person.to_string()),
                affected_assignment_ids: affected.into_iter().collect(),
                description: format!("{} has {} kinds of conflict: {}", person, types.len(), labels.join(", ")),
                detected_at: now,
                resolution_status: ResolutionStatus::Open,
                resolution_detail: None,
                swap_id: None,
            });
        }
        records.extend(cascading);

        records.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.conflict_type.cmp(&b.conflict_type))
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });
        records
    }

    pub fn scan(&self, start: NaiveDate, end: NaiveDate) -> SchedulingResult<ConflictReport> {
        self.scan_at(start, end, chrono::Utc::now().naive_utc())
    }

    /// Rescan [start, end] and upsert the findings. Re-entrant: a rescan of
    /// an unchanged schedule creates nothing new and keeps resolution state.
    #[instrument(skip_all, fields(start = %start, end = %end))]
    pub fn scan_at(&self, start: NaiveDate, end: NaiveDate, now: NaiveDateTime) -> SchedulingResult<ConflictReport> {
        if end < start {
            return Err(SchedulingError::Validation(format!(
                "scan end {} is before start {}",
                end, start
            )));
        }
        let ctx = ContextLoader::new(&self.repos).load(start, end, &self.policy, BTreeSet::new())?;
        let registry = ConstraintRegistry::standard(&self.policy);
        let found = Self::detect(&ctx, &registry, now);

        let mut conflicts = Vec::with_capacity(found.len());
        let mut new_count = 0;
        for record in found {
            let (conflict_id, is_new) = self.repos.conflict_repo.upsert(&record)?;
            if is_new {
                new_count += 1;
                self.events.notify(
                    ScheduleEvent::new(&conflict_id, ScheduleEventType::ConflictDetected, "conflict-detector")
                        .people(record.person_id.iter().cloned().collect())
                        .dates(start, end),
                );
            }
            let stored = self.repos.conflict_repo.find_by_id(&conflict_id)?.unwrap_or(record);
            conflicts.push(stored);
        }

        let existing_count = conflicts.len() - new_count;
        tracing::info!(
            found = conflicts.len(),
            new = new_count,
            existing = existing_count,
            "conflict scan finished"
        );

        Ok(ConflictReport {
            scanned_at: now,
            start_date: start,
            end_date: end,
            conflicts,
            new_count,
            existing_count,
        })
    }
}
