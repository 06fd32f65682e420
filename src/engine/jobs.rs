// ==========================================
// Residency Scheduler - Background generation jobs
// ==========================================
// One submitted generation = one tokio task. Callers get a cancellation
// token, a watch channel of solver progress and a join handle. The
// registry forgets a job once its task completes.
// ==========================================

use crate::engine::control::{CancellationToken, ProgressReporter, SolverControl, SolverProgress};
use crate::engine::error::{SchedulingError, SchedulingResult};
use crate::engine::generator::{GenerationOutcome, GenerationRequest, ScheduleGenerator};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct ActiveJob {
    cancel: CancellationToken,
    progress: watch::Receiver<SolverProgress>,
}

type JobTable = Arc<Mutex<HashMap<String, ActiveJob>>>;

/// Handle to one running generation.
pub struct GenerationJob {
    pub job_id: String,
    cancel: CancellationToken,
    progress: watch::Receiver<SolverProgress>,
    handle: JoinHandle<SchedulingResult<GenerationOutcome>>,
}

impl GenerationJob {
    /// Ask the solver to stop at its next poll; the best partial result is
    /// still returned through `join`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn progress(&self) -> SolverProgress {
        self.progress.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SolverProgress> {
        self.progress.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn join(self) -> SchedulingResult<GenerationOutcome> {
        self.handle
            .await
            .map_err(|e| SchedulingError::Task(e.to_string()))?
    }
}

pub struct GenerationJobRunner {
    generator: Arc<ScheduleGenerator>,
    active: JobTable,
}

impl GenerationJobRunner {
    pub fn new(generator: Arc<ScheduleGenerator>) -> Self {
        Self {
            generator,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Validate the request, then start the generation in the background.
    pub async fn submit(&self, request: GenerationRequest) -> SchedulingResult<GenerationJob> {
        request.validate()?;
        let policy = self.generator.load_policy().await?;

        let cancel = CancellationToken::new();
        let (reporter, progress) =
            ProgressReporter::channel(Duration::from_millis(policy.control.progress_interval_ms));
        let control = SolverControl::new(cancel.clone(), policy.control.check_interval).with_progress(reporter);
        let job_id = uuid::Uuid::new_v4().to_string();

        if let Ok(mut table) = self.active.lock() {
            table.insert(
                job_id.clone(),
                ActiveJob {
                    cancel: cancel.clone(),
                    progress: progress.clone(),
                },
            );
        }

        let generator = Arc::clone(&self.generator);
        let table = Arc::clone(&self.active);
        let task_id = job_id.clone();
        let handle = tokio::spawn(async move {
            let result = generator.generate_with_control(request, control).await;
            if let Ok(mut table) = table.lock() {
                table.remove(&task_id);
            }
            match &result {
                Ok(outcome) => tracing::info!(
                    job_id = %task_id,
                    status = %outcome.result.status,
                    committed = outcome.committed,
                    "generation job finished"
                ),
                Err(e) => tracing::warn!(job_id = %task_id, error = %e, "generation job failed"),
            }
            result
        });

        tracing::info!(job_id = %job_id, "generation job submitted");
        Ok(GenerationJob {
            job_id,
            cancel,
            progress,
            handle,
        })
    }

    /// Signal cancellation by job id.
    ///
    /// # Returns
    /// false when no such job is running
    pub fn cancel(&self, job_id: &str) -> bool {
        let Ok(table) = self.active.lock() else {
            return false;
        };
        match table.get(job_id) {
            Some(job) => {
                job.cancel.cancel();
                tracing::info!(job_id = %job_id, "generation job cancellation requested");
                true
            }
            None => false,
        }
    }

    pub fn progress(&self, job_id: &str) -> Option<SolverProgress> {
        let table = self.active.lock().ok()?;
        table.get(job_id).map(|job| job.progress.borrow().clone())
    }

    pub fn running_jobs(&self) -> Vec<String> {
        self.active
            .lock()
            .map(|table| {
                let mut ids: Vec<String> = table.keys().cloned().collect();
                ids.sort();
                ids
            })
            .unwrap_or_default()
    }
}
