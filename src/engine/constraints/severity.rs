// ==========================================
// Violation severity: constraint type x magnitude over threshold
// ==========================================

use super::{codes, Violation};
use crate::domain::types::{ConstraintKind, Severity};

/// Hours excess (share of the window limit) from which an hour
/// violation is CRITICAL.
const CRITICAL_HOURS_EXCESS_RATIO: f64 = 0.10;

pub fn classify_severity(v: &Violation) -> Severity {
    if v.kind == ConstraintKind::Soft {
        return if v.limit > 0.0 && v.magnitude >= v.limit {
            Severity::Medium
        } else {
            Severity::Low
        };
    }

    match v.constraint.as_str() {
        codes::DOUBLE_BOOKING | codes::ABSENCE | codes::SUPERVISION => Severity::Critical,
        codes::WORK_HOUR_VIOLATION => {
            if v.limit > 0.0 && v.magnitude / v.limit >= CRITICAL_HOURS_EXCESS_RATIO {
                Severity::Critical
            } else {
                Severity::High
            }
        }
        codes::REST_VIOLATION => {
            if v.magnitude >= 2.0 {
                Severity::Critical
            } else {
                Severity::High
            }
        }
        codes::ELIGIBILITY => Severity::High,
        codes::COVERAGE | codes::CAPACITY => {
            if v.magnitude >= 2.0 {
                Severity::High
            } else {
                Severity::Medium
            }
        }
        _ => Severity::Medium,
    }
}
