// ==========================================
// Residency Scheduler - Schedule API
// ==========================================
// Generation (blocking or background), run history, assignment queries
// and pinning. Failing solver statuses surface as typed errors that
// keep the partial result size and the violation list.
// ==========================================

use std::sync::Arc;

use chrono::NaiveDate;

use crate::api::dto::{AssignmentDto, GenerateResponse, RunSummary};
use crate::api::error::{ApiError, ApiResult};
use crate::domain::schedule_run::ScheduleRun;
use crate::engine::control::SolverProgress;
use crate::engine::generator::{GenerationRequest, ScheduleGenerator};
use crate::engine::jobs::{GenerationJob, GenerationJobRunner};
use crate::engine::repositories::ScheduleRepositories;

const MAX_RUN_PAGE: usize = 200;

pub struct ScheduleApi {
    repos: ScheduleRepositories,
    generator: Arc<ScheduleGenerator>,
    jobs: Arc<GenerationJobRunner>,
}

impl ScheduleApi {
    pub fn new(
        repos: ScheduleRepositories,
        generator: Arc<ScheduleGenerator>,
        jobs: Arc<GenerationJobRunner>,
    ) -> Self {
        Self {
            repos,
            generator,
            jobs,
        }
    }

    // ==========================================
    // Generation
    // ==========================================

    /// Generate and wait for the result.
    ///
    /// # Errors
    /// - `Infeasible`: no backend satisfied every hard constraint
    /// - `SolverTimeout`: stopped early without a committable schedule
    /// - `ConfigError`: the stored policy is invalid
    pub async fn generate(&self, request: GenerationRequest) -> ApiResult<GenerateResponse> {
        let outcome = self.generator.generate(request).await?.into_result()?;
        Ok(GenerateResponse::from(&outcome))
    }

    /// Start a generation in the background.
    pub async fn submit_generation(&self, request: GenerationRequest) -> ApiResult<GenerationJob> {
        Ok(self.jobs.submit(request).await?)
    }

    pub fn cancel_generation(&self, job_id: &str) -> ApiResult<()> {
        if self.jobs.cancel(job_id) {
            Ok(())
        } else {
            Err(ApiError::NotFound(format!("generation job (id={})", job_id)))
        }
    }

    pub fn generation_progress(&self, job_id: &str) -> ApiResult<SolverProgress> {
        self.jobs
            .progress(job_id)
            .ok_or_else(|| ApiError::NotFound(format!("generation job (id={})", job_id)))
    }

    pub fn running_generations(&self) -> Vec<String> {
        self.jobs.running_jobs()
    }

    // ==========================================
    // Runs
    // ==========================================

    pub fn get_run(&self, run_id: &str) -> ApiResult<ScheduleRun> {
        self.repos
            .run_repo
            .find_by_id(run_id)?
            .ok_or_else(|| ApiError::NotFound(format!("ScheduleRun (id={})", run_id)))
    }

    /// Most recent runs first.
    pub fn list_runs(&self, limit: usize) -> ApiResult<Vec<RunSummary>> {
        if limit == 0 || limit > MAX_RUN_PAGE {
            return Err(ApiError::InvalidInput(format!(
                "limit must be between 1 and {}",
                MAX_RUN_PAGE
            )));
        }
        let runs = self.repos.run_repo.list_recent(limit)?;
        Ok(runs.iter().map(RunSummary::from).collect())
    }

    // ==========================================
    // Assignments
    // ==========================================

    pub fn list_assignments(&self, start: NaiveDate, end: NaiveDate) -> ApiResult<Vec<AssignmentDto>> {
        check_range(start, end)?;
        let rows = self.repos.assignment_repo.list_active_in_range(start, end)?;
        Ok(rows.iter().map(AssignmentDto::from).collect())
    }

    pub fn list_person_assignments(
        &self,
        person_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> ApiResult<Vec<AssignmentDto>> {
        check_range(start, end)?;
        if self.repos.person_repo.find_by_id(person_id)?.is_none() {
            return Err(ApiError::NotFound(format!("Person (id={})", person_id)));
        }
        let rows = self
            .repos
            .assignment_repo
            .list_active_for_person(person_id, start, end)?;
        Ok(rows.iter().map(AssignmentDto::from).collect())
    }

    /// Pin or unpin an assignment against regeneration.
    ///
    /// # Errors
    /// - `OptimisticLockFailure`: `expected_version` is stale
    pub fn set_assignment_locked(
        &self,
        assignment_id: &str,
        expected_version: i32,
        locked: bool,
    ) -> ApiResult<AssignmentDto> {
        self.repos
            .assignment_repo
            .set_locked(assignment_id, expected_version, locked)?;
        let updated = self
            .repos
            .assignment_repo
            .find_by_id(assignment_id)?
            .ok_or_else(|| ApiError::NotFound(format!("Assignment (id={})", assignment_id)))?;
        tracing::info!(assignment_id, locked, version = updated.version, "assignment lock changed");
        Ok(AssignmentDto::from(&updated))
    }
}

fn check_range(start: NaiveDate, end: NaiveDate) -> ApiResult<()> {
    if end < start {
        return Err(ApiError::InvalidInput(format!(
            "end date {} is before start date {}",
            end, start
        )));
    }
    Ok(())
}
