// ==========================================
// Residency Scheduler - Schedule generation service
// ==========================================
// Flow: policy -> context -> registry + model -> fallback chain under
// solver control -> one transaction committing the run and its
// assignments -> ScheduleGenerated notification.
// The CPU-bound part runs on the blocking pool; no lock is held while
// solving. Only the final commit is transactional.
// ==========================================

use crate::config::{SchedulingConfigReader, SchedulingPolicy};
use crate::domain::assignment::Assignment;
use crate::domain::schedule_run::ScheduleRun;
use crate::domain::types::{AssignmentSource, SolverStatus};
use crate::engine::constraints::{codes, ConstraintRegistry};
use crate::engine::context::ContextLoader;
use crate::engine::control::{phases, CancellationToken, SolveMetrics, SolveProfiler, SolverControl};
use crate::engine::error::{SchedulingError, SchedulingResult};
use crate::engine::events::{OptionalEventPublisher, ScheduleEvent, ScheduleEventType};
use crate::engine::repositories::ScheduleRepositories;
use crate::engine::solver::{
    build_chain, AssignmentModel, FallbackOrchestrator, FallbackOutcome, Problem, SolveBudget,
    SolveResult, Solver,
};
use crate::repository::{AssignmentRepository, ScheduleRunRepository};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

/// Fully-resolved generation request from the API layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Committed assignments every solver must keep
    #[serde(default)]
    pub locked_assignment_ids: Vec<String>,
    /// Single backend instead of the configured chain
    #[serde(default)]
    pub solver_override: Option<String>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub time_budget_ms: Option<u64>,
    /// Solve and report, write nothing
    #[serde(default)]
    pub dry_run: bool,
}

impl GenerationRequest {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            start_date,
            end_date,
            locked_assignment_ids: Vec::new(),
            solver_override: None,
            seed: None,
            time_budget_ms: None,
            dry_run: false,
        }
    }

    pub fn validate(&self) -> SchedulingResult<()> {
        if self.end_date < self.start_date {
            return Err(SchedulingError::Validation(format!(
                "end date {} is before start date {}",
                self.end_date, self.start_date
            )));
        }
        if (self.end_date - self.start_date).num_days() > 366 {
            return Err(SchedulingError::Validation(
                "generation range longer than one year".to_string(),
            ));
        }
        if self.time_budget_ms == Some(0) {
            return Err(SchedulingError::Validation("time budget must be positive".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    /// Audit row (not persisted for dry runs)
    pub run: ScheduleRun,
    pub result: SolveResult,
    pub attempts_explanation: Option<String>,
    pub committed: bool,
    /// Previously active solver rows deactivated by this run
    pub superseded: usize,
    pub metrics: SolveMetrics,
}

impl GenerationOutcome {
    /// Map failing statuses onto the error taxonomy, keeping the partial
    /// result and violation list attached.
    pub fn into_result(self) -> SchedulingResult<GenerationOutcome> {
        match self.result.status {
            SolverStatus::Optimal | SolverStatus::Feasible => Ok(self),
            SolverStatus::Aborted if self.committed => Ok(self),
            SolverStatus::Infeasible => Err(SchedulingError::Infeasible {
                partial: self.result.assignments,
                violations: self.result.violations,
                explanation: self
                    .attempts_explanation
                    .unwrap_or_else(|| "no backend found a feasible schedule".to_string()),
            }),
            SolverStatus::Timeout | SolverStatus::Aborted => Err(SchedulingError::TimeoutAborted {
                partial: self.result.assignments,
                violations: self.result.violations,
                reason: self
                    .attempts_explanation
                    .unwrap_or_else(|| self.result.status.to_string()),
            }),
        }
    }
}

// ==========================================
// ScheduleGenerator
// ==========================================
pub struct ScheduleGenerator {
    repos: ScheduleRepositories,
    config: Arc<dyn SchedulingConfigReader>,
    events: OptionalEventPublisher,
    /// Replaces the configured chain (embedding callers, tests)
    chain_override: Option<Vec<Arc<dyn Solver>>>,
}

impl ScheduleGenerator {
    pub fn new(repos: ScheduleRepositories, config: Arc<dyn SchedulingConfigReader>) -> Self {
        Self {
            repos,
            config,
            events: OptionalEventPublisher::none(),
            chain_override: None,
        }
    }

    pub fn with_events(mut self, events: OptionalEventPublisher) -> Self {
        self.events = events;
        self
    }

    pub fn with_chain(mut self, chain: Vec<Arc<dyn Solver>>) -> Self {
        self.chain_override = Some(chain);
        self
    }

    /// Validated policy from the configuration source.
    ///
    /// # Errors
    /// - `ConfigSource`: the source could not be read
    /// - `ConstraintConfig`: contradictory or out-of-range values
    pub async fn load_policy(&self) -> SchedulingResult<SchedulingPolicy> {
        let policy = self
            .config
            .load_policy()
            .await
            .map_err(|e| SchedulingError::ConfigSource(e.to_string()))?;
        policy
            .validate()
            .map_err(|problems| SchedulingError::ConstraintConfig { problems })?;
        Ok(policy)
    }

    /// Control without an external cancellation source.
    pub fn default_control(policy: &SchedulingPolicy) -> SolverControl {
        SolverControl::new(CancellationToken::new(), policy.control.check_interval)
    }

    pub async fn generate(&self, request: GenerationRequest) -> SchedulingResult<GenerationOutcome> {
        let policy = self.load_policy().await?;
        let control = Self::default_control(&policy);
        self.generate_with_control(request, control).await
    }

    /// Run one generation under the given control.
    ///
    /// Returns Ok for every solver status; use
    /// `GenerationOutcome::into_result` to turn INFEASIBLE / TIMEOUT /
    /// uncommitted ABORTED into errors.
    #[instrument(skip_all, fields(start = %request.start_date, end = %request.end_date))]
    pub async fn generate_with_control(
        &self,
        request: GenerationRequest,
        control: SolverControl,
    ) -> SchedulingResult<GenerationOutcome> {
        request.validate()?;
        let policy = self.load_policy().await?;
        let chain = self.resolve_chain(&request, &policy)?;
        let snapshot = match self.config.config_snapshot().await {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(error = %e, "config snapshot unavailable, run recorded without it");
                None
            }
        };

        let seed = request.seed.unwrap_or(policy.solver.default_seed);
        let mut budget = SolveBudget::from_policy(&policy);
        if let Some(ms) = request.time_budget_ms {
            budget.time_budget = Duration::from_millis(ms);
        }

        tracing::info!(
            chain = ?chain.iter().map(|s| s.name()).collect::<Vec<_>>(),
            seed,
            locked = request.locked_assignment_ids.len(),
            "schedule generation started"
        );

        // ===== solve (blocking pool) =====
        let repos = self.repos.clone();
        let solve_request = request.clone();
        let solve_policy = policy.clone();
        let (outcome, mut profiler) = tokio::task::spawn_blocking(move || {
            solve_blocking(&repos, &solve_request, &solve_policy, chain, &budget, seed, &control)
        })
        .await
        .map_err(|e| SchedulingError::Task(e.to_string()))??;

        // ===== commit =====
        let started = Instant::now();
        let commit = !request.dry_run && commit_allowed(&outcome.result, &policy);
        let mut run = build_run(&request, &outcome, seed, commit, snapshot);
        run.metrics_json = serde_json::to_string(&profiler.clone().finish()).ok();
        let superseded = if request.dry_run {
            0
        } else {
            self.persist(&request, &run, &outcome.result, commit)?
        };
        profiler.record(phases::POST_PROCESS, started.elapsed());
        let metrics = profiler.finish();

        tracing::info!(
            run_id = %run.run_id,
            solver = %run.solver_used,
            status = %run.status,
            assignments = run.assignment_count,
            committed = commit,
            superseded,
            total_ms = metrics.total_ms,
            "schedule generation finished"
        );

        if commit {
            let people: Vec<String> = outcome
                .result
                .assignments
                .iter()
                .map(|a| a.person_id.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            self.events.notify(
                ScheduleEvent::new(&run.run_id, ScheduleEventType::ScheduleGenerated, "generator")
                    .people(people)
                    .dates(request.start_date, request.end_date),
            );
        }

        Ok(GenerationOutcome {
            run,
            attempts_explanation: outcome.explanation.clone(),
            result: outcome.result,
            committed: commit,
            superseded,
            metrics,
        })
    }

    fn resolve_chain(
        &self,
        request: &GenerationRequest,
        policy: &SchedulingPolicy,
    ) -> SchedulingResult<Vec<Arc<dyn Solver>>> {
        if let Some(name) = &request.solver_override {
            return build_chain(std::slice::from_ref(name));
        }
        if let Some(chain) = &self.chain_override {
            return Ok(chain.clone());
        }
        build_chain(&policy.solver.order)
    }

    /// Write the run and, when committing, its assignments in one
    /// transaction.
    ///
    /// # Returns
    /// Number of earlier assignments superseded
    fn persist(
        &self,
        request: &GenerationRequest,
        run: &ScheduleRun,
        result: &SolveResult,
        commit: bool,
    ) -> SchedulingResult<usize> {
        let _perf = crate::perf::PerfGuard::new("persist_schedule_run");
        self.repos.in_transaction(|tx| {
            ScheduleRunRepository::insert_with(tx, run)?;
            if !commit {
                return Ok(0);
            }

            AssignmentRepository::lock_ids_with(tx, &request.locked_assignment_ids)?;
            let superseded = AssignmentRepository::supersede_unlocked_in_range_with(
                tx,
                request.start_date,
                request.end_date,
                &run.run_id,
            )?;

            for planned in result.assignments.iter().filter(|a| !a.fixed) {
                let mut a = Assignment::new(
                    &planned.person_id,
                    &planned.block_id,
                    &planned.template_id,
                    AssignmentSource::Solver,
                )
                .with_rationale(&planned.rationale, planned.confidence);
                a.schedule_run_id = Some(run.run_id.clone());
                AssignmentRepository::insert_with(tx, &a)?;
            }
            Ok::<usize, SchedulingError>(superseded)
        })
    }
}

/// Context build, model build and the fallback chain; runs off the async
/// executor.
fn solve_blocking(
    repos: &ScheduleRepositories,
    request: &GenerationRequest,
    policy: &SchedulingPolicy,
    chain: Vec<Arc<dyn Solver>>,
    budget: &SolveBudget,
    seed: u64,
    control: &SolverControl,
) -> SchedulingResult<(FallbackOutcome, SolveProfiler)> {
    let mut profiler = SolveProfiler::new();

    let extra_locked: BTreeSet<String> = request.locked_assignment_ids.iter().cloned().collect();
    let ctx = profiler.phase(phases::CONTEXT_BUILD, || {
        ContextLoader::new(repos).load(request.start_date, request.end_date, policy, extra_locked.clone())
    })?;
    if let Some(missing) = extra_locked.iter().find(|id| ctx.live_by_id(id).is_none()) {
        return Err(SchedulingError::Validation(format!(
            "locked assignment {} is not active inside {}..{}",
            missing, request.start_date, request.end_date
        )));
    }

    let (registry, model) = profiler.phase(phases::CONSTRAIN, || {
        let registry = ConstraintRegistry::standard(policy);
        let model = AssignmentModel::build(&ctx, &registry);
        (registry, model)
    });
    tracing::debug!(
        vars = model.vars.len(),
        groups = model.groups.len(),
        fixed = model.fixed.len(),
        "assignment model built"
    );

    let problem = Problem {
        ctx: &ctx,
        registry: &registry,
        model: &model,
    };
    let orchestrator = FallbackOrchestrator::new(chain);
    let outcome = profiler.phase(phases::SOLVE, || orchestrator.run(&problem, budget, seed, control));
    Ok((outcome, profiler))
}

/// OPTIMAL / FEASIBLE always; ABORTED only when policy allows partial
/// commits and the partial breaks nothing but coverage floors.
fn commit_allowed(result: &SolveResult, policy: &SchedulingPolicy) -> bool {
    let hard = result.hard_violations();
    match result.status {
        SolverStatus::Optimal | SolverStatus::Feasible => hard.is_empty(),
        SolverStatus::Aborted => {
            policy.solver.allow_partial_commit
                && !result.assignments.is_empty()
                && hard.iter().all(|v| v.constraint == codes::COVERAGE)
        }
        SolverStatus::Infeasible | SolverStatus::Timeout => false,
    }
}

fn build_run(
    request: &GenerationRequest,
    outcome: &FallbackOutcome,
    seed: u64,
    committed: bool,
    config_snapshot_json: Option<String>,
) -> ScheduleRun {
    let result = &outcome.result;
    ScheduleRun {
        run_id: uuid::Uuid::new_v4().to_string(),
        start_date: request.start_date,
        end_date: request.end_date,
        solver_used: result.solver_name.clone(),
        status: result.status,
        objective_score: result.objective_score,
        seed,
        assignment_count: result.assignments.len(),
        violations_json: serde_json::to_string(&result.violations).unwrap_or_else(|_| "[]".to_string()),
        attempts: outcome.attempts.clone(),
        fallback_reason: outcome.fallback_reason.clone(),
        metrics_json: None,
        config_snapshot_json,
        committed,
        created_at: chrono::Utc::now().naive_utc(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    #[test]
    fn test_request_validation() {
        assert!(GenerationRequest::new(d(2), d(8)).validate().is_ok());
        assert!(matches!(
            GenerationRequest::new(d(8), d(2)).validate(),
            Err(SchedulingError::Validation(_))
        ));
        let mut zero = GenerationRequest::new(d(2), d(8));
        zero.time_budget_ms = Some(0);
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_partial_commit_needs_policy_and_clean_partial() {
        let mut policy = SchedulingPolicy::default();
        let mut aborted = SolveResult::empty("cp_sat", SolverStatus::Aborted, "cancelled");
        assert!(!commit_allowed(&aborted, &policy));

        aborted.assignments.push(crate::engine::solver::PlannedAssignment {
            person_id: "R1".to_string(),
            block_id: "2026-03-02-AM".to_string(),
            template_id: "CLINIC".to_string(),
            rationale: "cp_sat: required coverage".to_string(),
            confidence: 0.95,
            fixed: false,
        });
        assert!(!commit_allowed(&aborted, &policy));
        policy.solver.allow_partial_commit = true;
        assert!(commit_allowed(&aborted, &policy));

        let timeout = SolveResult::empty("milp", SolverStatus::Timeout, "node limit");
        assert!(!commit_allowed(&timeout, &policy));
    }
}
