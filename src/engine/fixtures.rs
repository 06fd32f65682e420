// ==========================================
// Test fixtures: rosters, templates and contexts built in memory
// ==========================================

use crate::config::SchedulingPolicy;
use crate::domain::assignment::Assignment;
use crate::domain::block::Block;
use crate::domain::person::{Absence, Person, Preference};
use crate::domain::rotation::RotationTemplate;
use crate::domain::types::{ActivityCategory, AssignmentSource, Role, TimeOfDay};
use crate::engine::context::{ContextInput, SchedulingContext};
use chrono::{Duration, NaiveDate};
use std::collections::BTreeSet;

/// 2026-03-02 is a Monday.
pub fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
}

pub fn day(offset: i64) -> NaiveDate {
    monday() + Duration::days(offset)
}

pub fn block_id(date: NaiveDate, tod: TimeOfDay) -> String {
    format!("{}-{}", date, tod)
}

pub fn resident(id: &str, pgy: u8) -> Person {
    Person {
        person_id: id.to_string(),
        name: format!("Dr. {}", id),
        role: Role::Resident,
        pgy_level: Some(pgy),
        certifications: vec!["BLS".to_string()],
        specialty: None,
        active: true,
    }
}

pub fn faculty(id: &str) -> Person {
    Person {
        person_id: id.to_string(),
        name: format!("Dr. {}", id),
        role: Role::Faculty,
        pgy_level: None,
        certifications: vec!["BLS".to_string(), "ACLS".to_string()],
        specialty: Some("IM".to_string()),
        active: true,
    }
}

pub fn template(id: &str, category: ActivityCategory) -> RotationTemplate {
    RotationTemplate {
        template_id: id.to_string(),
        name: id.to_string(),
        category,
        eligible_pgy_levels: vec![1, 2, 3],
        required_certification: None,
        required_specialty: None,
        min_residents: 0,
        max_residents: 4,
        faculty_capacity: 2,
        supervision_ratio: 2,
        senior_supervision_ratio: None,
        hours_per_block: None,
        time_of_day: None,
        active: true,
    }
}

pub fn calendar(start: NaiveDate, end: NaiveDate) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut date = start;
    while date <= end {
        for tod in [TimeOfDay::AM, TimeOfDay::PM] {
            blocks.push(Block::new(block_id(date, tod), date, tod));
        }
        date += Duration::days(1);
    }
    blocks
}

/// In-memory context builder.
pub struct Scenario {
    pub input: ContextInput,
}

impl Scenario {
    /// `days` scheduled days from `monday()`, no lookback history.
    pub fn new(days: i64) -> Self {
        let mut policy = SchedulingPolicy::default();
        policy.lookback_days = 0;
        let start = monday();
        let end = day(days - 1);
        Self {
            input: ContextInput {
                start_date: start,
                end_date: end,
                policy,
                people: Vec::new(),
                templates: Vec::new(),
                blocks: calendar(start, end),
                absences: Vec::new(),
                preferences: Vec::new(),
                assignments: Vec::new(),
                extra_locked: BTreeSet::new(),
            },
        }
    }

    pub fn lookback(mut self, days: u32) -> Self {
        self.input.policy.lookback_days = days;
        let history_start = self.input.start_date - Duration::days(days as i64);
        let mut blocks = calendar(history_start, self.input.start_date - Duration::days(1));
        blocks.retain(|b| !self.input.blocks.contains(b));
        blocks.append(&mut self.input.blocks);
        self.input.blocks = blocks;
        self
    }

    /// Calendar days after the range, for work committed past end_date.
    pub fn trailing(mut self, days: i64) -> Self {
        let end = self.input.end_date;
        self.input
            .blocks
            .extend(calendar(end + Duration::days(1), end + Duration::days(days)));
        self
    }

    pub fn policy(mut self, edit: impl FnOnce(&mut SchedulingPolicy)) -> Self {
        edit(&mut self.input.policy);
        self
    }

    pub fn person(mut self, person: Person) -> Self {
        self.input.people.push(person);
        self
    }

    pub fn template(mut self, template: RotationTemplate) -> Self {
        self.input.templates.push(template);
        self
    }

    pub fn absence(mut self, person_id: &str, from: NaiveDate, to: NaiveDate) -> Self {
        let n = self.input.absences.len();
        self.input.absences.push(Absence {
            absence_id: format!("ABS{}", n),
            person_id: person_id.to_string(),
            start_date: from,
            end_date: to,
            reason: Some("leave".to_string()),
        });
        self
    }

    pub fn preference(mut self, pref: Preference) -> Self {
        self.input.preferences.push(pref);
        self
    }

    /// Committed assignment; `locked` marks it fixed for solvers.
    pub fn assignment(
        mut self,
        id: &str,
        person_id: &str,
        date: NaiveDate,
        tod: TimeOfDay,
        template_id: &str,
        locked: bool,
    ) -> Self {
        let mut a = Assignment::new(person_id, block_id(date, tod), template_id, AssignmentSource::Manual);
        a.assignment_id = id.to_string();
        a.locked = locked;
        self.input.assignments.push(a);
        self
    }

    pub fn context(self) -> SchedulingContext {
        SchedulingContext::build(self.input).unwrap()
    }
}

// ==========================================
// Persisted scenarios
// ==========================================

/// Fresh in-memory database with the full schema.
pub fn memory_repos() -> crate::engine::repositories::ScheduleRepositories {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    crate::db::init_schema(&conn).unwrap();
    crate::engine::repositories::ScheduleRepositories::new(std::sync::Arc::new(std::sync::Mutex::new(conn)))
}

impl Scenario {
    /// Write every row of the scenario through the repositories.
    pub fn seed(&self, repos: &crate::engine::repositories::ScheduleRepositories) {
        for person in &self.input.people {
            repos.person_repo.upsert(person).unwrap();
        }
        for template in &self.input.templates {
            repos.template_repo.upsert(template).unwrap();
        }
        for block in &self.input.blocks {
            repos.block_repo.insert(block).unwrap();
        }
        for absence in &self.input.absences {
            repos.absence_repo.insert(absence).unwrap();
        }
        for pref in &self.input.preferences {
            repos.preference_repo.insert(pref).unwrap();
        }
        repos.assignment_repo.batch_insert(&self.input.assignments).unwrap();
    }
}
