// ==========================================
// Residency Scheduler - Engine notification events
// ==========================================
// The engine defines the publisher trait; outer layers (mail, pager,
// dashboards) implement it. Delivery is fire-and-forget: a failed
// publish is logged and never fails the operation that raised it.
// ==========================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;

// ==========================================
// Event types
// ==========================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleEventType {
    ScheduleGenerated,
    SwapExecuted,
    SwapRolledBack,
    ConflictDetected,
    ConflictResolved,
}

impl ScheduleEventType {
    pub fn as_str(&self) -> &str {
        match self {
            ScheduleEventType::ScheduleGenerated => "ScheduleGenerated",
            ScheduleEventType::SwapExecuted => "SwapExecuted",
            ScheduleEventType::SwapRolledBack => "SwapRolledBack",
            ScheduleEventType::ConflictDetected => "ConflictDetected",
            ScheduleEventType::ConflictResolved => "ConflictResolved",
        }
    }
}

/// One notification: what happened, to whom, over which dates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEvent {
    /// run_id, swap_id or conflict_id depending on the type
    pub subject_id: String,
    pub event_type: ScheduleEventType,
    pub source: Option<String>,
    /// Empty means "everyone in the range"
    pub affected_person_ids: Vec<String>,
    pub affected_date_range: Option<(NaiveDate, NaiveDate)>,
}

impl ScheduleEvent {
    pub fn new(subject_id: impl Into<String>, event_type: ScheduleEventType, source: &str) -> Self {
        Self {
            subject_id: subject_id.into(),
            event_type,
            source: Some(source.to_string()),
            affected_person_ids: Vec::new(),
            affected_date_range: None,
        }
    }

    pub fn people(mut self, person_ids: Vec<String>) -> Self {
        self.affected_person_ids = person_ids;
        self
    }

    pub fn dates(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.affected_date_range = Some((start, end));
        self
    }
}

// ==========================================
// Publisher trait
// ==========================================

/// Notification collaborator.
///
/// # Returns
/// - `Ok(delivery_id)`: id assigned by the sink, or empty
/// - `Err`: delivery failed; the caller only logs it
pub trait ScheduleEventPublisher: Send + Sync {
    fn publish(&self, event: ScheduleEvent) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// Drops every event (unit tests, headless runs).
#[derive(Debug, Clone, Default)]
pub struct NoOpEventPublisher;

impl ScheduleEventPublisher for NoOpEventPublisher {
    fn publish(&self, event: ScheduleEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            subject_id = %event.subject_id,
            event_type = event.event_type.as_str(),
            "event publisher not configured, event dropped"
        );
        Ok(String::new())
    }
}

/// Wrapper over `Option<Arc<dyn ScheduleEventPublisher>>`.
#[derive(Clone)]
pub struct OptionalEventPublisher {
    inner: Option<Arc<dyn ScheduleEventPublisher>>,
}

impl OptionalEventPublisher {
    pub fn with_publisher(publisher: Arc<dyn ScheduleEventPublisher>) -> Self {
        Self {
            inner: Some(publisher),
        }
    }

    pub fn none() -> Self {
        Self { inner: None }
    }

    pub fn publish(&self, event: ScheduleEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        match &self.inner {
            Some(publisher) => publisher.publish(event),
            None => NoOpEventPublisher.publish(event),
        }
    }

    /// Publish and swallow failures; the engine never blocks on delivery.
    pub fn notify(&self, event: ScheduleEvent) {
        let subject_id = event.subject_id.clone();
        let event_type = event.event_type.as_str().to_string();
        if let Err(e) = self.publish(event) {
            tracing::warn!(
                subject_id = %subject_id,
                event_type = %event_type,
                error = %e,
                "event delivery failed"
            );
        }
    }

    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }
}

impl Default for OptionalEventPublisher {
    fn default() -> Self {
        Self::none()
    }
}

/// Publisher that keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingEventPublisher {
    events: std::sync::Mutex<Vec<ScheduleEvent>>,
}

impl RecordingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ScheduleEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count_of(&self, event_type: &ScheduleEventType) -> usize {
        self.events().iter().filter(|e| &e.event_type == event_type).count()
    }
}

impl ScheduleEventPublisher for RecordingEventPublisher {
    fn publish(&self, event: ScheduleEvent) -> Result<String, Box<dyn Error + Send + Sync>> {
        let mut events = self
            .events
            .lock()
            .map_err(|e| format!("event buffer poisoned: {}", e))?;
        events.push(event);
        Ok(events.len().to_string())
    }
}
