// ==========================================
// Residency Scheduler - Domain value types
// ==========================================
// Enumerations shared by entities, engine and persistence.
// Database strings are SCREAMING_SNAKE_CASE unless noted.
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// Role
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Resident, // trainee, carries a PGY level
    Faculty,  // supervising attending
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

impl Role {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "RESIDENT" => Some(Role::Resident),
            "FACULTY" => Some(Role::Faculty),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            Role::Resident => "RESIDENT",
            Role::Faculty => "FACULTY",
        }
    }
}

// ==========================================
// TimeOfDay - half-day slot
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TimeOfDay {
    AM,
    PM,
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

impl TimeOfDay {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "AM" => Some(TimeOfDay::AM),
            "PM" => Some(TimeOfDay::PM),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            TimeOfDay::AM => "AM",
            TimeOfDay::PM => "PM",
        }
    }
}

// ==========================================
// ActivityCategory - rotation template category
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityCategory {
    Clinic,
    Inpatient,
    Procedure,
    Call,
    Conference,
    Elective,
}

impl fmt::Display for ActivityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

impl ActivityCategory {
    /// Clinical activities need supervision coverage for trainees.
    pub fn is_clinical(&self) -> bool {
        !matches!(self, ActivityCategory::Conference | ActivityCategory::Elective)
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "CLINIC" => Some(ActivityCategory::Clinic),
            "INPATIENT" => Some(ActivityCategory::Inpatient),
            "PROCEDURE" => Some(ActivityCategory::Procedure),
            "CALL" => Some(ActivityCategory::Call),
            "CONFERENCE" => Some(ActivityCategory::Conference),
            "ELECTIVE" => Some(ActivityCategory::Elective),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            ActivityCategory::Clinic => "CLINIC",
            ActivityCategory::Inpatient => "INPATIENT",
            ActivityCategory::Procedure => "PROCEDURE",
            ActivityCategory::Call => "CALL",
            ActivityCategory::Conference => "CONFERENCE",
            ActivityCategory::Elective => "ELECTIVE",
        }
    }
}

// ==========================================
// AssignmentSource - who produced an assignment row
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentSource {
    Solver,
    Swap,
    Resolver,
    Manual,
}

impl AssignmentSource {
    pub fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "SWAP" => AssignmentSource::Swap,
            "RESOLVER" => AssignmentSource::Resolver,
            "MANUAL" => AssignmentSource::Manual,
            _ => AssignmentSource::Solver,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            AssignmentSource::Solver => "SOLVER",
            AssignmentSource::Swap => "SWAP",
            AssignmentSource::Resolver => "RESOLVER",
            AssignmentSource::Manual => "MANUAL",
        }
    }
}

// ==========================================
// PreferenceKind
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PreferenceKind {
    PreferTemplate,
    AvoidTemplate,
    DayOff,
}

impl PreferenceKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PREFER_TEMPLATE" => Some(PreferenceKind::PreferTemplate),
            "AVOID_TEMPLATE" => Some(PreferenceKind::AvoidTemplate),
            "DAY_OFF" => Some(PreferenceKind::DayOff),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            PreferenceKind::PreferTemplate => "PREFER_TEMPLATE",
            PreferenceKind::AvoidTemplate => "AVOID_TEMPLATE",
            PreferenceKind::DayOff => "DAY_OFF",
        }
    }
}

// ==========================================
// SolverStatus - tagged outcome of one solve
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SolverStatus {
    Optimal,
    Feasible,
    Infeasible,
    Timeout,
    Aborted,
}

impl fmt::Display for SolverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

impl SolverStatus {
    /// A status whose assignments satisfy every hard constraint.
    pub fn has_solution(&self) -> bool {
        matches!(self, SolverStatus::Optimal | SolverStatus::Feasible)
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "OPTIMAL" => SolverStatus::Optimal,
            "FEASIBLE" => SolverStatus::Feasible,
            "TIMEOUT" => SolverStatus::Timeout,
            "ABORTED" => SolverStatus::Aborted,
            _ => SolverStatus::Infeasible,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            SolverStatus::Optimal => "OPTIMAL",
            SolverStatus::Feasible => "FEASIBLE",
            SolverStatus::Infeasible => "INFEASIBLE",
            SolverStatus::Timeout => "TIMEOUT",
            SolverStatus::Aborted => "ABORTED",
        }
    }
}

// ==========================================
// ConstraintKind
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstraintKind {
    Hard, // invalidates a candidate outright
    Soft, // weighted penalty only
}

// ==========================================
// Severity
// ==========================================
// Order: Low < Medium < High < Critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

impl Severity {
    pub fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "CRITICAL" => Severity::Critical,
            "HIGH" => Severity::High,
            "MEDIUM" => Severity::Medium,
            _ => Severity::Low,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

// ==========================================
// ConflictType
// ==========================================
// Database strings are snake_case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    DoubleBooking,
    HourViolation,
    RestViolation,
    SupervisionGap,
    AbsenceConflict,
    CoverageGap,
    CredentialViolation,
    Cascading,
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_str())
    }
}

impl ConflictType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "double_booking" => Some(ConflictType::DoubleBooking),
            "hour_violation" => Some(ConflictType::HourViolation),
            "rest_violation" => Some(ConflictType::RestViolation),
            "supervision_gap" => Some(ConflictType::SupervisionGap),
            "absence_conflict" => Some(ConflictType::AbsenceConflict),
            "coverage_gap" => Some(ConflictType::CoverageGap),
            "credential_violation" => Some(ConflictType::CredentialViolation),
            "cascading" => Some(ConflictType::Cascading),
            _ => None,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            ConflictType::DoubleBooking => "double_booking",
            ConflictType::HourViolation => "hour_violation",
            ConflictType::RestViolation => "rest_violation",
            ConflictType::SupervisionGap => "supervision_gap",
            ConflictType::AbsenceConflict => "absence_conflict",
            ConflictType::CoverageGap => "coverage_gap",
            ConflictType::CredentialViolation => "credential_violation",
            ConflictType::Cascading => "cascading",
        }
    }
}

// ==========================================
// ResolutionStatus - outcome of a conflict record
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionStatus {
    Open,
    AutoResolved,
    ProposedForReview,
    Escalated,
}

impl ResolutionStatus {
    pub fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "AUTO_RESOLVED" => ResolutionStatus::AutoResolved,
            "PROPOSED_FOR_REVIEW" => ResolutionStatus::ProposedForReview,
            "ESCALATED" => ResolutionStatus::Escalated,
            _ => ResolutionStatus::Open,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            ResolutionStatus::Open => "OPEN",
            ResolutionStatus::AutoResolved => "AUTO_RESOLVED",
            ResolutionStatus::ProposedForReview => "PROPOSED_FOR_REVIEW",
            ResolutionStatus::Escalated => "ESCALATED",
        }
    }
}

// ==========================================
// SwapStatus
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapStatus {
    Executed,
    RolledBack,
}

impl SwapStatus {
    pub fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "ROLLED_BACK" => SwapStatus::RolledBack,
            _ => SwapStatus::Executed,
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            SwapStatus::Executed => "EXECUTED",
            SwapStatus::RolledBack => "ROLLED_BACK",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_clinical_categories() {
        assert!(ActivityCategory::Clinic.is_clinical());
        assert!(ActivityCategory::Call.is_clinical());
        assert!(!ActivityCategory::Conference.is_clinical());
        assert!(!ActivityCategory::Elective.is_clinical());
    }

    #[test]
    fn test_conflict_type_db_strings() {
        for t in [
            ConflictType::DoubleBooking,
            ConflictType::HourViolation,
            ConflictType::RestViolation,
            ConflictType::SupervisionGap,
            ConflictType::Cascading,
        ] {
            assert_eq!(ConflictType::from_str(t.to_db_str()), Some(t));
        }
    }
}
