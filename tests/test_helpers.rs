// ==========================================
// Integration test helpers
// ==========================================
// Temp SQLite databases, roster/template builders and seeding through
// the public repositories.
// ==========================================

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::{Duration, NaiveDate};
use rusqlite::Connection;
use tempfile::NamedTempFile;

use residency_scheduler::app::AppState;
use residency_scheduler::db::{init_schema, open_sqlite_connection};
use residency_scheduler::domain::{Absence, Assignment, Person, RotationTemplate};
use residency_scheduler::engine::ScheduleRepositories;
use residency_scheduler::{ActivityCategory, AssignmentSource, Role, TimeOfDay};

/// Create a temp database file with the full schema.
///
/// # Returns
/// - NamedTempFile: keep alive for the duration of the test
/// - String: database path
pub fn create_test_db() -> (NamedTempFile, String) {
    let temp_file = NamedTempFile::new().expect("temp file");
    let db_path = temp_file.path().to_str().expect("utf-8 path").to_string();
    let conn = Connection::open(&db_path).expect("open database");
    init_schema(&conn).expect("schema");
    (temp_file, db_path)
}

/// Repositories over their own connection to `db_path`.
pub fn open_repos(db_path: &str) -> ScheduleRepositories {
    let conn = open_sqlite_connection(db_path).expect("open database");
    ScheduleRepositories::new(Arc::new(Mutex::new(conn)))
}

/// Temp database plus fully wired application state.
pub struct TestEnv {
    _temp_file: NamedTempFile,
    pub db_path: String,
    pub state: AppState,
}

impl TestEnv {
    pub fn new() -> Self {
        residency_scheduler::logging::init_test();
        let (temp_file, db_path) = create_test_db();
        let state = AppState::new(db_path.clone()).expect("app state");
        Self {
            _temp_file: temp_file,
            db_path,
            state,
        }
    }

    pub fn repos(&self) -> &ScheduleRepositories {
        &self.state.repos
    }

    /// Rebuild the state so services pick up configuration changes.
    pub fn reload(&mut self) {
        self.state = AppState::new(self.db_path.clone()).expect("app state");
    }
}

// ==========================================
// Calendar
// ==========================================

/// 2026-03-02 is a Monday.
pub fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
}

pub fn day(offset: i64) -> NaiveDate {
    monday() + Duration::days(offset)
}

pub fn block_id(date: NaiveDate, tod: TimeOfDay) -> String {
    format!("{}-{}", date.format("%Y-%m-%d"), tod)
}

// ==========================================
// Builders
// ==========================================

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

// ==========================================
// Seeding
// ==========================================

pub fn seed_people(repos: &ScheduleRepositories, people: &[Person]) {
    for person in people {
        repos.person_repo.upsert(person).expect("person");
    }
}

pub fn seed_templates(repos: &ScheduleRepositories, templates: &[RotationTemplate]) {
    for t in templates {
        repos.template_repo.upsert(t).expect("template");
    }
}

pub fn seed_calendar(repos: &ScheduleRepositories, start: NaiveDate, end: NaiveDate) {
    repos.block_repo.generate_calendar(start, end).expect("calendar");
}

pub fn seed_absence(repos: &ScheduleRepositories, person_id: &str, from: NaiveDate, to: NaiveDate) {
    repos
        .absence_repo
        .insert(&Absence {
            absence_id: uuid::Uuid::new_v4().to_string(),
            person_id: person_id.to_string(),
            start_date: from,
            end_date: to,
            reason: Some("sick leave".to_string()),
        })
        .expect("absence");
}

/// Manually committed assignment with a fixed id.
pub fn seed_assignment(
    repos: &ScheduleRepositories,
    id: &str,
    person_id: &str,
    date: NaiveDate,
    tod: TimeOfDay,
    template_id: &str,
) -> Assignment {
    let mut a = Assignment::new(person_id, block_id(date, tod), template_id, AssignmentSource::Manual);
    a.assignment_id = id.to_string();
    repos.assignment_repo.insert(&a).expect("assignment");
    a
}

/// (assignment_id, person, block, template) of every active row, sorted.
pub fn active_placements(
    repos: &ScheduleRepositories,
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<(String, String, String, String)> {
    let mut rows: Vec<_> = repos
        .assignment_repo
        .list_active_in_range(start, end)
        .expect("assignments")
        .into_iter()
        .map(|a| (a.assignment_id, a.person_id, a.block_id, a.template_id))
        .collect();
    rows.sort();
    rows
}
