// ==========================================
// Residency Scheduler - SchedulingContext
// ==========================================
// Immutable snapshot for one solve or one validation:
// roster, calendar, templates, absences, preferences, live assignments
// and per-person workload on the days around the range: the lookback
// history before it and committed work after it, up to one rolling
// window past end_date. Days outside the range are fixed occupancy.
// Pure function of its input: no clock reads, no randomness.
// ==========================================

use crate::config::SchedulingPolicy;
use crate::domain::assignment::Assignment;
use crate::domain::block::Block;
use crate::domain::person::{Absence, Person, Preference};
use crate::domain::rotation::RotationTemplate;
use crate::domain::types::ActivityCategory;
use crate::engine::error::{SchedulingError, SchedulingResult};
use crate::engine::repositories::ScheduleRepositories;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Index triple into a context: people[person], blocks[block], templates[template].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Placement {
    pub person: usize,
    pub block: usize,
    pub template: usize,
}

impl Placement {
    pub fn new(person: usize, block: usize, template: usize) -> Self {
        Self {
            person,
            block,
            template,
        }
    }
}

/// An active committed assignment inside the context range.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveAssignment {
    pub placement: Placement,
    pub assignment_id: String,
    pub version: i32,
    pub locked: bool,
}

/// Raw material for `SchedulingContext::build`.
#[derive(Debug, Clone)]
pub struct ContextInput {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub policy: SchedulingPolicy,
    pub people: Vec<Person>,
    pub templates: Vec<RotationTemplate>,
    /// Blocks in [start - lookback, horizon]; blocks outside
    /// [start, end] are split off
    pub blocks: Vec<Block>,
    pub absences: Vec<Absence>,
    pub preferences: Vec<Preference>,
    /// Active assignments in [start - lookback, horizon]
    pub assignments: Vec<Assignment>,
    /// Assignment ids to treat as locked in addition to their stored flag
    pub extra_locked: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct SchedulingContext {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub history_start: NaiveDate,
    /// Last day whose committed work still shares a window with the range
    pub horizon_end: NaiveDate,
    pub policy: SchedulingPolicy,

    // ===== ordered snapshot =====
    pub people: Vec<Person>,             // by person_id
    pub blocks: Vec<Block>,              // in range, chronological
    pub templates: Vec<RotationTemplate>, // by name
    pub absences: Vec<Absence>,
    pub preferences: Vec<Preference>,
    pub live: Vec<LiveAssignment>,       // chronological

    /// Rows dropped while building (unknown person/template/block)
    pub skipped: Vec<String>,

    // ===== derived =====
    person_index: HashMap<String, usize>,
    block_index: HashMap<String, usize>,
    template_index: HashMap<String, usize>,
    block_day: Vec<usize>,
    day_count: usize,
    unavailable: Vec<Vec<bool>>,          // [person][block]
    ineligible: Vec<Vec<Option<String>>>, // [person][template]
    outside_hours: Vec<Vec<f64>>,         // [person][day]
    prefs_by_person: Vec<Vec<usize>>,
}

impl SchedulingContext {
    /// Build the snapshot.
    ///
    /// # Errors
    /// - `Validation`: inverted date range
    pub fn build(input: ContextInput) -> SchedulingResult<Self> {
        let ContextInput {
            start_date,
            end_date,
            policy,
            mut people,
            mut templates,
            blocks: all_blocks,
            mut absences,
            mut preferences,
            mut assignments,
            extra_locked,
        } = input;

        if end_date < start_date {
            return Err(SchedulingError::Validation(format!(
                "end date {} is before start date {}",
                end_date, start_date
            )));
        }

        let history_start = start_date - Duration::days(policy.lookback_days as i64);
        let horizon_end = horizon_end(end_date, &policy);
        let day_count = (horizon_end - history_start).num_days() as usize + 1;

        people.retain(|p| p.active);
        people.sort_by(|a, b| a.person_id.cmp(&b.person_id));
        people.dedup_by(|a, b| a.person_id == b.person_id);

        templates.retain(|t| t.active);
        templates.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.template_id.cmp(&b.template_id)));

        let mut outside_blocks: HashMap<String, NaiveDate> = HashMap::new();
        let mut blocks: Vec<Block> = Vec::new();
        for block in all_blocks {
            if block.date < history_start || block.date > horizon_end {
                continue;
            }
            if block.date < start_date || block.date > end_date {
                outside_blocks.insert(block.block_id.clone(), block.date);
            } else {
                blocks.push(block);
            }
        }
        blocks.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()).then_with(|| a.block_id.cmp(&b.block_id)));

        absences.sort_by(|a, b| {
            (a.person_id.as_str(), a.start_date, a.absence_id.as_str())
                .cmp(&(b.person_id.as_str(), b.start_date, b.absence_id.as_str()))
        });
        preferences.sort_by(|a, b| {
            (a.person_id.as_str(), a.preference_id.as_str())
                .cmp(&(b.person_id.as_str(), b.preference_id.as_str()))
        });

        let person_index: HashMap<String, usize> = people
            .iter()
            .enumerate()
            .map(|(i, p)| (p.person_id.clone(), i))
            .collect();
        let block_index: HashMap<String, usize> = blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (b.block_id.clone(), i))
            .collect();
        let template_index: HashMap<String, usize> = templates
            .iter()
            .enumerate()
            .map(|(i, t)| (t.template_id.clone(), i))
            .collect();

        let block_day: Vec<usize> = blocks
            .iter()
            .map(|b| (b.date - history_start).num_days() as usize)
            .collect();

        // ===== availability =====
        let mut unavailable = vec![vec![false; blocks.len()]; people.len()];
        for absence in &absences {
            if let Some(&p) = person_index.get(&absence.person_id) {
                for (b, block) in blocks.iter().enumerate() {
                    if absence.covers(block.date) {
                        unavailable[p][b] = true;
                    }
                }
            }
        }

        // ===== eligibility =====
        let ineligible: Vec<Vec<Option<String>>> = people
            .iter()
            .map(|person| {
                templates
                    .iter()
                    .map(|t| t.eligibility_of(person).err())
                    .collect()
            })
            .collect();

        // ===== live assignments, history and trailing work =====
        let mut outside_hours = vec![vec![0.0; day_count]; people.len()];
        let mut live = Vec::new();
        let mut skipped = Vec::new();
        assignments.sort_by(|a, b| a.assignment_id.cmp(&b.assignment_id));

        for a in &assignments {
            let Some(&p) = person_index.get(&a.person_id) else {
                skipped.push(format!("assignment {}: person {} not in roster", a.assignment_id, a.person_id));
                continue;
            };
            let hours = template_index
                .get(&a.template_id)
                .and_then(|&t| templates[t].hours_per_block)
                .unwrap_or(policy.default_block_hours);

            if let Some(date) = outside_blocks.get(&a.block_id) {
                let day = (*date - history_start).num_days() as usize;
                outside_hours[p][day] += hours;
                continue;
            }

            let (Some(&b), Some(&t)) = (block_index.get(&a.block_id), template_index.get(&a.template_id)) else {
                skipped.push(format!(
                    "assignment {}: block {} or template {} outside snapshot",
                    a.assignment_id, a.block_id, a.template_id
                ));
                continue;
            };
            live.push(LiveAssignment {
                placement: Placement::new(p, b, t),
                assignment_id: a.assignment_id.clone(),
                version: a.version,
                locked: a.locked || extra_locked.contains(&a.assignment_id),
            });
        }
        live.sort_by(|x, y| {
            (x.placement.block, x.placement.template, x.placement.person, x.assignment_id.as_str()).cmp(&(
                y.placement.block,
                y.placement.template,
                y.placement.person,
                y.assignment_id.as_str(),
            ))
        });

        for msg in &skipped {
            tracing::warn!(detail = %msg, "context row skipped");
        }

        let mut prefs_by_person = vec![Vec::new(); people.len()];
        for (i, pref) in preferences.iter().enumerate() {
            if let Some(&p) = person_index.get(&pref.person_id) {
                prefs_by_person[p].push(i);
            }
        }

        Ok(Self {
            start_date,
            end_date,
            history_start,
            horizon_end,
            policy,
            people,
            blocks,
            templates,
            absences,
            preferences,
            live,
            skipped,
            person_index,
            block_index,
            template_index,
            block_day,
            day_count,
            unavailable,
            ineligible,
            outside_hours,
            prefs_by_person,
        })
    }

    // ==========================================
    // Lookups
    // ==========================================

    pub fn person_idx(&self, person_id: &str) -> Option<usize> {
        self.person_index.get(person_id).copied()
    }

    pub fn block_idx(&self, block_id: &str) -> Option<usize> {
        self.block_index.get(block_id).copied()
    }

    pub fn template_idx(&self, template_id: &str) -> Option<usize> {
        self.template_index.get(template_id).copied()
    }

    /// Day offset of a block from `history_start`.
    pub fn day_of_block(&self, block: usize) -> usize {
        self.block_day[block]
    }

    pub fn date_of_day(&self, day: usize) -> NaiveDate {
        self.history_start + Duration::days(day as i64)
    }

    /// Days from history_start through horizon_end.
    pub fn day_count(&self) -> usize {
        self.day_count
    }

    /// Day offset of start_date.
    pub fn first_range_day(&self) -> usize {
        (self.start_date - self.history_start).num_days() as usize
    }

    /// Day offset of end_date.
    pub fn last_range_day(&self) -> usize {
        (self.end_date - self.history_start).num_days() as usize
    }

    pub fn hours_of(&self, template: usize) -> f64 {
        self.templates[template]
            .hours_per_block
            .unwrap_or(self.policy.default_block_hours)
    }

    pub fn is_available(&self, person: usize, block: usize) -> bool {
        !self.unavailable[person][block]
    }

    pub fn ineligibility(&self, person: usize, template: usize) -> Option<&str> {
        self.ineligible[person][template].as_deref()
    }

    /// Person may take (block, template): available, eligible and the
    /// template runs at that time of day.
    pub fn is_candidate(&self, person: usize, block: usize, template: usize) -> bool {
        self.is_available(person, block)
            && self.ineligible[person][template].is_none()
            && self.templates[template].allows_time(self.blocks[block].time_of_day)
    }

    /// Hours already worked on days outside the range, indexed by day.
    pub fn outside_hours(&self, person: usize) -> &[f64] {
        &self.outside_hours[person]
    }

    pub fn preferences_of(&self, person: usize) -> impl Iterator<Item = &Preference> {
        self.prefs_by_person[person]
            .iter()
            .map(move |&i| &self.preferences[i])
    }

    /// Other half-day of the same date.
    pub fn sibling_block(&self, block: usize) -> Option<usize> {
        let date = self.blocks[block].date;
        [block.checked_sub(1), Some(block + 1)]
            .into_iter()
            .flatten()
            .find(|&o| o < self.blocks.len() && self.blocks[o].date == date)
    }

    /// Templates some resident on the roster is eligible for; the
    /// template-balance objective spreads work across exactly these.
    pub fn balance_templates(&self) -> Vec<bool> {
        (0..self.templates.len())
            .map(|t| {
                self.people
                    .iter()
                    .enumerate()
                    .any(|(p, person)| person.is_resident() && self.ineligible[p][t].is_none())
            })
            .collect()
    }

    /// Fairness cohort (PGY level) of a resident.
    pub fn cohort_of(&self, person: usize) -> Option<u8> {
        let person = &self.people[person];
        if person.is_resident() {
            person.pgy_level
        } else {
            None
        }
    }

    /// Weekend or call work counted by the fairness objective.
    pub fn is_burden(&self, block: usize, template: usize) -> bool {
        self.blocks[block].is_weekend() || self.templates[template].category == ActivityCategory::Call
    }

    /// Fixed placements every solver keeps.
    pub fn locked_placements(&self) -> Vec<Placement> {
        self.live
            .iter()
            .filter(|l| l.locked)
            .map(|l| l.placement)
            .collect()
    }

    /// Current committed schedule inside the range.
    pub fn live_placements(&self) -> Vec<Placement> {
        self.live.iter().map(|l| l.placement).collect()
    }

    pub fn live_by_id(&self, assignment_id: &str) -> Option<&LiveAssignment> {
        self.live.iter().find(|l| l.assignment_id == assignment_id)
    }

    /// Readable label for logs and violation messages.
    pub fn describe(&self, p: &Placement) -> String {
        let block = &self.blocks[p.block];
        format!(
            "{} on {} {} as {}",
            self.people[p.person].person_id, block.date, block.time_of_day, self.templates[p.template].name
        )
    }
}

/// Committed work through this day can share a rolling window with
/// `end_date`.
pub fn horizon_end(end_date: NaiveDate, policy: &SchedulingPolicy) -> NaiveDate {
    end_date + Duration::days(policy.longest_window_days().saturating_sub(1) as i64)
}

// ==========================================
// ContextLoader - reads a snapshot from the repositories
// ==========================================
pub struct ContextLoader<'a> {
    repos: &'a ScheduleRepositories,
}

impl<'a> ContextLoader<'a> {
    pub fn new(repos: &'a ScheduleRepositories) -> Self {
        Self { repos }
    }

    pub fn load(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        policy: &SchedulingPolicy,
        extra_locked: BTreeSet<String>,
    ) -> SchedulingResult<SchedulingContext> {
        let _perf = crate::perf::PerfGuard::new("load_scheduling_context");
        if end_date < start_date {
            return Err(SchedulingError::Validation(format!(
                "end date {} is before start date {}",
                end_date, start_date
            )));
        }
        let history_start = start_date - Duration::days(policy.lookback_days as i64);
        let horizon = horizon_end(end_date, policy);

        let input = ContextInput {
            start_date,
            end_date,
            policy: policy.clone(),
            people: self.repos.person_repo.list_active()?,
            templates: self.repos.template_repo.list_active()?,
            blocks: self.repos.block_repo.list_in_range(history_start, horizon)?,
            absences: self.repos.absence_repo.list_overlapping(history_start, end_date)?,
            preferences: self.repos.preference_repo.list_all()?,
            assignments: self
                .repos
                .assignment_repo
                .list_active_in_range(history_start, horizon)?,
            extra_locked,
        };

        let ctx = SchedulingContext::build(input)?;
        tracing::debug!(
            people = ctx.people.len(),
            blocks = ctx.blocks.len(),
            templates = ctx.templates.len(),
            live = ctx.live.len(),
            "scheduling context loaded"
        );
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{AssignmentSource, Role, TimeOfDay};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    fn resident(id: &str, pgy: u8) -> Person {
        Person {
            person_id: id.to_string(),
            name: id.to_string(),
            role: Role::Resident,
            pgy_level: Some(pgy),
            certifications: vec![],
            specialty: None,
            active: true,
        }
    }

    fn clinic() -> RotationTemplate {
        RotationTemplate {
            template_id: "T-CLINIC".to_string(),
            name: "Clinic".to_string(),
            category: ActivityCategory::Clinic,
            eligible_pgy_levels: vec![2, 3],
            required_certification: None,
            required_specialty: None,
            min_residents: 0,
            max_residents: 4,
            faculty_capacity: 0,
            supervision_ratio: 2,
            senior_supervision_ratio: None,
            hours_per_block: Some(5.0),
            time_of_day: None,
            active: true,
        }
    }

    fn input() -> ContextInput {
        let mut policy = SchedulingPolicy::default();
        policy.lookback_days = 7;
        let blocks = (1..=14)
            .flat_map(|day| {
                [TimeOfDay::AM, TimeOfDay::PM]
                    .into_iter()
                    .map(move |tod| Block::new(format!("B{}{}", day, tod), d(day), tod))
            })
            .collect();
        let mut history = Assignment::new("R2", "B3AM", "T-CLINIC", AssignmentSource::Solver);
        history.assignment_id = "H1".to_string();
        ContextInput {
            start_date: d(8),
            end_date: d(14),
            policy,
            people: vec![resident("R2", 2), resident("R1", 1)],
            templates: vec![clinic()],
            blocks,
            absences: vec![Absence {
                absence_id: "ABS1".to_string(),
                person_id: "R2".to_string(),
                start_date: d(10),
                end_date: d(10),
                reason: None,
            }],
            preferences: vec![],
            assignments: vec![history],
            extra_locked: BTreeSet::new(),
        }
    }

    #[test]
    fn test_build_orders_and_splits_history() {
        let ctx = SchedulingContext::build(input()).unwrap();
        assert_eq!(ctx.people[0].person_id, "R1");
        assert_eq!(ctx.blocks.len(), 14);
        assert_eq!(ctx.blocks[0].date, d(8));
        assert_eq!(ctx.history_start, d(1));
        assert!(ctx.live.is_empty());

        let r2 = ctx.person_idx("R2").unwrap();
        assert_eq!(ctx.outside_hours(r2)[2], 5.0);
        assert_eq!(ctx.first_range_day(), 7);
    }

    #[test]
    fn test_absence_and_eligibility_exclude_candidates() {
        let ctx = SchedulingContext::build(input()).unwrap();
        let r1 = ctx.person_idx("R1").unwrap();
        let r2 = ctx.person_idx("R2").unwrap();
        let absent_block = ctx.block_idx("B10AM").unwrap();
        let free_block = ctx.block_idx("B11AM").unwrap();

        assert!(!ctx.is_candidate(r2, absent_block, 0));
        assert!(ctx.is_candidate(r2, free_block, 0));
        assert!(ctx.ineligibility(r1, 0).is_some());
    }

    #[test]
    fn test_identical_input_gives_identical_context() {
        let a = SchedulingContext::build(input()).unwrap();
        let mut shuffled = input();
        shuffled.people.reverse();
        shuffled.blocks.reverse();
        let b = SchedulingContext::build(shuffled).unwrap();
        assert_eq!(a.people, b.people);
        assert_eq!(a.blocks, b.blocks);
        assert_eq!(a.outside_hours, b.outside_hours);
    }

    #[test]
    fn test_work_after_the_range_is_fixed_occupancy() {
        let mut trailing = input();
        trailing.end_date = d(10);
        let mut later = Assignment::new("R2", "B12PM", "T-CLINIC", AssignmentSource::Manual);
        later.assignment_id = "L1".to_string();
        trailing.assignments.push(later);

        let ctx = SchedulingContext::build(trailing).unwrap();
        assert_eq!(ctx.blocks.len(), 6);
        assert!(ctx.block_idx("B12PM").is_none());
        assert!(ctx.live.is_empty());
        assert_eq!(ctx.horizon_end, d(10) + Duration::days(27));
        assert_eq!(ctx.last_range_day(), 9);

        let r2 = ctx.person_idx("R2").unwrap();
        assert_eq!(ctx.outside_hours(r2)[11], 5.0);

        // every rest window reaching the range is checked, none starts after it
        let windows = crate::engine::constraints::rolling_windows(&ctx, 7);
        assert_eq!(windows.first(), Some(&(1, 7)));
        assert_eq!(windows.last(), Some(&(9, 15)));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let mut bad = input();
        bad.end_date = d(1);
        assert!(matches!(
            SchedulingContext::build(bad),
            Err(SchedulingError::Validation(_))
        ));
    }
}
