// ==========================================
// Residency Scheduler - People, absences, preferences
// ==========================================

use crate::domain::types::{PreferenceKind, Role};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ==========================================
// Person - resident or supervising faculty
// ==========================================
// PGY level is mutated yearly by an external transition process.
// Never hard-deleted while referenced by assignments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub person_id: String,
    pub name: String,
    pub role: Role,
    pub pgy_level: Option<u8>,       // 1..=3, residents only
    pub certifications: Vec<String>, // e.g. BLS, ACLS
    pub specialty: Option<String>,   // faculty specialty
    pub active: bool,
}

impl Person {
    pub fn is_resident(&self) -> bool {
        self.role == Role::Resident
    }

    pub fn is_faculty(&self) -> bool {
        self.role == Role::Faculty
    }

    /// PGY-1 residents need direct supervision on clinical work.
    pub fn is_intern(&self) -> bool {
        self.is_resident() && self.pgy_level == Some(1)
    }

    pub fn has_certification(&self, cert: &str) -> bool {
        self.certifications.iter().any(|c| c.eq_ignore_ascii_case(cert))
    }
}

// ==========================================
// Absence - inclusive date range of unavailability
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Absence {
    pub absence_id: String,
    pub person_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: Option<String>,
}

impl Absence {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.start_date <= end && start <= self.end_date
    }
}

// ==========================================
// Preference - soft wish of one person
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preference {
    pub preference_id: String,
    pub person_id: String,
    pub kind: PreferenceKind,
    pub template_id: Option<String>, // PreferTemplate / AvoidTemplate
    pub date: Option<NaiveDate>,     // DayOff
    pub weight: f64,
}
