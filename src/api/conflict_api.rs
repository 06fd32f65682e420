// ==========================================
// Residency Scheduler - Conflict API
// ==========================================

use std::sync::Arc;

use chrono::NaiveDate;

use crate::api::error::{ApiError, ApiResult};
use crate::domain::conflict::ConflictRecord;
use crate::engine::conflict::{ConflictDetector, ConflictReport, ConflictResolver, ResolutionOutcome};
use crate::engine::repositories::ScheduleRepositories;

pub struct ConflictApi {
    repos: ScheduleRepositories,
    detector: Arc<ConflictDetector>,
    resolver: Arc<ConflictResolver>,
}

impl ConflictApi {
    pub fn new(
        repos: ScheduleRepositories,
        detector: Arc<ConflictDetector>,
        resolver: Arc<ConflictResolver>,
    ) -> Self {
        Self {
            repos,
            detector,
            resolver,
        }
    }

    /// Scan the committed schedule; rescanning the same range is idempotent.
    pub fn scan(&self, start: NaiveDate, end: NaiveDate) -> ApiResult<ConflictReport> {
        Ok(self.detector.scan(start, end)?)
    }

    pub fn resolve(&self, conflict_id: &str) -> ApiResult<ResolutionOutcome> {
        Ok(self.resolver.resolve(conflict_id)?)
    }

    /// Attempt every open conflict, most severe first.
    pub fn resolve_open(&self) -> ApiResult<Vec<ResolutionOutcome>> {
        Ok(self.resolver.resolve_open(chrono::Utc::now().naive_utc())?)
    }

    pub fn get_conflict(&self, conflict_id: &str) -> ApiResult<ConflictRecord> {
        self.repos
            .conflict_repo
            .find_by_id(conflict_id)?
            .ok_or_else(|| ApiError::NotFound(format!("ConflictRecord (id={})", conflict_id)))
    }

    pub fn list_open(&self) -> ApiResult<Vec<ConflictRecord>> {
        Ok(self.repos.conflict_repo.list_open()?)
    }
}
