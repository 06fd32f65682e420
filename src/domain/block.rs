// ==========================================
// Residency Scheduler - Block (half-day unit)
// ==========================================
// Generated once per academic year; immutable thereafter.

use crate::domain::types::TimeOfDay;
use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub block_id: String,
    pub date: NaiveDate,
    pub time_of_day: TimeOfDay,
}

impl Block {
    pub fn new(block_id: impl Into<String>, date: NaiveDate, time_of_day: TimeOfDay) -> Self {
        Self {
            block_id: block_id.into(),
            date,
            time_of_day,
        }
    }

    pub fn is_weekend(&self) -> bool {
        matches!(self.date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    /// Chronological key: date, then AM before PM.
    pub fn sort_key(&self) -> (NaiveDate, TimeOfDay) {
        (self.date, self.time_of_day)
    }
}
