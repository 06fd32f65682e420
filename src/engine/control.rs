// ==========================================
// Residency Scheduler - Solver control
// ==========================================
// Cooperative cancellation, rate-limited progress and phase profiling
// around any solver run. Solvers poll at bounded intervals; nothing is
// interrupted preemptively.
// ==========================================

use crate::engine::solver::SolveBudget;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;

// ==========================================
// CancellationToken
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ==========================================
// Progress
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolverProgress {
    pub solver_name: String,
    pub iterations: u64,
    pub best_objective: Option<f64>,
    pub elapsed_ms: u64,
    pub finished: bool,
}

/// Publishes progress on a watch channel, at most once per interval.
pub struct ProgressReporter {
    tx: watch::Sender<SolverProgress>,
    min_interval: Duration,
    last_sent: Mutex<Option<Instant>>,
}

impl ProgressReporter {
    pub fn channel(min_interval: Duration) -> (Arc<Self>, watch::Receiver<SolverProgress>) {
        let (tx, rx) = watch::channel(SolverProgress::default());
        (
            Arc::new(Self {
                tx,
                min_interval,
                last_sent: Mutex::new(None),
            }),
            rx,
        )
    }

    /// Publish unless the previous publication is too recent.
    /// `force` bypasses the rate limit (final reports).
    pub fn report(&self, progress: SolverProgress, force: bool) {
        let Ok(mut last) = self.last_sent.lock() else {
            return;
        };
        let now = Instant::now();
        let due = force || last.map_or(true, |t| now.duration_since(t) >= self.min_interval);
        if due {
            *last = Some(now);
            // no receiver left is not an error for the solver
            let _ = self.tx.send(progress);
        }
    }
}

// ==========================================
// SolverControl - handed to every solver
// ==========================================
#[derive(Clone)]
pub struct SolverControl {
    pub cancel: CancellationToken,
    /// Search nodes between cancellation / deadline polls
    pub check_interval: u64,
    progress: Option<Arc<ProgressReporter>>,
}

impl SolverControl {
    pub fn new(cancel: CancellationToken, check_interval: u64) -> Self {
        Self {
            cancel,
            check_interval: check_interval.max(1),
            progress: None,
        }
    }

    pub fn with_progress(mut self, reporter: Arc<ProgressReporter>) -> Self {
        self.progress = Some(reporter);
        self
    }

    /// No cancellation source, no progress sink.
    pub fn detached() -> Self {
        Self::new(CancellationToken::new(), 256)
    }

    pub fn report(&self, progress: SolverProgress, force: bool) {
        if let Some(reporter) = &self.progress {
            reporter.report(progress, force);
        }
    }
}

/// Why a search stopped before finishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    NodeLimit,
    Deadline,
}

impl StopReason {
    pub fn describe(&self, budget: &SolveBudget) -> String {
        match self {
            StopReason::Cancelled => "cancelled".to_string(),
            StopReason::NodeLimit => format!("node limit {} reached", budget.node_limit),
            StopReason::Deadline => format!("time budget {}ms exhausted", budget.time_budget.as_millis()),
        }
    }
}

// ==========================================
// SearchMonitor - node accounting inside one solve
// ==========================================
/// Counts search nodes and polls cancellation / wall clock every
/// `check_interval` nodes. The node limit is the deterministic budget;
/// the wall clock is only a safety net.
pub struct SearchMonitor<'a> {
    control: &'a SolverControl,
    budget: SolveBudget,
    solver_name: &'static str,
    started: Instant,
    nodes: u64,
    stopped: Option<StopReason>,
}

impl<'a> SearchMonitor<'a> {
    pub fn new(control: &'a SolverControl, budget: &SolveBudget, solver_name: &'static str) -> Self {
        Self {
            control,
            budget: budget.clone(),
            solver_name,
            started: Instant::now(),
            nodes: 0,
            stopped: None,
        }
    }

    /// Count one node. Returns the stop reason once the search must end.
    pub fn tick(&mut self, best_objective: Option<f64>) -> Option<StopReason> {
        if self.stopped.is_some() {
            return self.stopped;
        }
        self.nodes += 1;
        if self.nodes >= self.budget.node_limit {
            self.stopped = Some(StopReason::NodeLimit);
            return self.stopped;
        }
        if self.nodes % self.control.check_interval == 0 {
            if self.control.cancel.is_cancelled() {
                self.stopped = Some(StopReason::Cancelled);
            } else if self.started.elapsed() >= self.budget.time_budget {
                self.stopped = Some(StopReason::Deadline);
            }
            self.control.report(self.progress(best_objective, false), false);
        }
        self.stopped
    }

    pub fn nodes(&self) -> u64 {
        self.nodes
    }

    pub fn stopped(&self) -> Option<StopReason> {
        self.stopped
    }

    pub fn budget(&self) -> &SolveBudget {
        &self.budget
    }

    pub fn finish(&self, best_objective: Option<f64>) {
        self.control.report(self.progress(best_objective, true), true);
    }

    fn progress(&self, best_objective: Option<f64>, finished: bool) -> SolverProgress {
        SolverProgress {
            solver_name: self.solver_name.to_string(),
            iterations: self.nodes,
            best_objective,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            finished,
        }
    }
}

// ==========================================
// Profiling
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub phase: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolveMetrics {
    pub phases: Vec<PhaseTiming>,
    pub peak_memory_kb: Option<u64>,
    pub total_ms: u64,
}

impl SolveMetrics {
    pub fn phase_ms(&self, phase: &str) -> Option<u64> {
        self.phases.iter().find(|p| p.phase == phase).map(|p| p.elapsed_ms)
    }
}

pub mod phases {
    pub const CONTEXT_BUILD: &str = "context_build";
    pub const CONSTRAIN: &str = "constrain";
    pub const SOLVE: &str = "solve";
    pub const POST_PROCESS: &str = "post_process";
}

/// Records phase durations of one generation.
#[derive(Debug, Clone, Default)]
pub struct SolveProfiler {
    phases: Vec<PhaseTiming>,
}

impl SolveProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase<T>(&mut self, name: &str, f: impl FnOnce() -> T) -> T {
        let started = Instant::now();
        let out = f();
        self.record(name, started.elapsed());
        out
    }

    pub fn record(&mut self, name: &str, elapsed: Duration) {
        let elapsed_ms = elapsed.as_millis() as u64;
        tracing::debug!(target: "perf", phase = name, elapsed_ms, "solve phase finished");
        self.phases.push(PhaseTiming {
            phase: name.to_string(),
            elapsed_ms,
        });
    }

    /// Merge phases recorded elsewhere (e.g. inside a blocking task).
    pub fn absorb(&mut self, other: SolveProfiler) {
        self.phases.extend(other.phases);
    }

    pub fn finish(self) -> SolveMetrics {
        let total_ms = self.phases.iter().map(|p| p.elapsed_ms).sum();
        SolveMetrics {
            phases: self.phases,
            peak_memory_kb: crate::perf::peak_memory_kb(),
            total_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(nodes: u64) -> SolveBudget {
        SolveBudget {
            time_budget: Duration::from_secs(60),
            node_limit: nodes,
        }
    }

    #[test]
    fn test_cancellation_is_seen_at_check_interval() {
        let control = SolverControl::new(CancellationToken::new(), 4);
        let mut monitor = SearchMonitor::new(&control, &budget(1_000), "test");
        assert_eq!(monitor.tick(None), None);
        control.cancel.cancel();
        // polled only every 4 nodes
        assert_eq!(monitor.tick(None), None);
        assert_eq!(monitor.tick(None), None);
        assert_eq!(monitor.tick(None), Some(StopReason::Cancelled));
        assert_eq!(monitor.tick(None), Some(StopReason::Cancelled));
    }

    #[test]
    fn test_node_limit_stops_search() {
        let control = SolverControl::detached();
        let mut monitor = SearchMonitor::new(&control, &budget(3), "test");
        assert_eq!(monitor.tick(None), None);
        assert_eq!(monitor.tick(None), None);
        assert_eq!(monitor.tick(None), Some(StopReason::NodeLimit));
        assert_eq!(monitor.nodes(), 3);
    }

    #[test]
    fn test_progress_is_rate_limited() {
        let (reporter, rx) = ProgressReporter::channel(Duration::from_secs(3600));
        reporter.report(
            SolverProgress {
                iterations: 1,
                ..Default::default()
            },
            false,
        );
        reporter.report(
            SolverProgress {
                iterations: 2,
                ..Default::default()
            },
            false,
        );
        assert_eq!(rx.borrow().iterations, 1);

        reporter.report(
            SolverProgress {
                iterations: 3,
                finished: true,
                ..Default::default()
            },
            true,
        );
        assert_eq!(rx.borrow().iterations, 3);
    }

    #[test]
    fn test_profiler_records_phases() {
        let mut profiler = SolveProfiler::new();
        let v = profiler.phase(phases::CONTEXT_BUILD, || 7);
        assert_eq!(v, 7);
        profiler.record(phases::SOLVE, Duration::from_millis(12));
        let metrics = profiler.finish();
        assert_eq!(metrics.phases.len(), 2);
        assert_eq!(metrics.phase_ms(phases::SOLVE), Some(12));
    }
}
