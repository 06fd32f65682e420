// ==========================================
// FallbackOrchestrator - runs backends in priority order
// ==========================================
// The first backend returning a hard-feasible solution wins. Every
// failure is recorded as a SolverAttempt so the ScheduleRun explains
// why earlier backends were passed over. Cancellation ends the chain.
// ==========================================

use super::{Problem, SolveBudget, SolveResult, Solver};
use crate::domain::schedule_run::SolverAttempt;
use crate::domain::types::SolverStatus;
use crate::engine::control::SolverControl;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct FallbackOutcome {
    /// Winning result, or the most complete partial when nothing won
    pub result: SolveResult,
    pub attempts: Vec<SolverAttempt>,
    /// Why the chain moved past the first backend
    pub fallback_reason: Option<String>,
    /// Why nothing succeeded
    pub explanation: Option<String>,
}

impl FallbackOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.status.has_solution()
    }
}

pub struct FallbackOrchestrator {
    chain: Vec<Arc<dyn Solver>>,
}

impl FallbackOrchestrator {
    pub fn new(chain: Vec<Arc<dyn Solver>>) -> Self {
        Self { chain }
    }

    pub fn chain_names(&self) -> Vec<&'static str> {
        self.chain.iter().map(|s| s.name()).collect()
    }

    pub fn run(&self, problem: &Problem<'_>, budget: &SolveBudget, seed: u64, control: &SolverControl) -> FallbackOutcome {
        let mut attempts: Vec<SolverAttempt> = Vec::new();
        let mut best_partial: Option<SolveResult> = None;
        let mut aborted = false;

        for solver in &self.chain {
            if control.cancel.is_cancelled() {
                aborted = true;
                break;
            }
            let started = Instant::now();
            let outcome = solver.solve(problem, budget, seed, control);
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let result = match outcome {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(solver = solver.name(), error = %e, "solver backend failed");
                    SolveResult::empty(solver.name(), SolverStatus::Infeasible, format!("ERROR: {}", e))
                }
            };

            let hard = result.hard_violations().len();
            if result.status.has_solution() && hard == 0 {
                attempts.push(SolverAttempt {
                    solver_name: result.solver_name.clone(),
                    status: result.status,
                    objective_score: Some(result.objective_score),
                    elapsed_ms,
                    failure_reason: None,
                });
                let fallback_reason = if attempts.len() > 1 { summarize_failures(&attempts) } else { None };
                if let Some(reason) = &fallback_reason {
                    tracing::info!(solver = solver.name(), reason = %reason, "fallback solver succeeded");
                }
                return FallbackOutcome {
                    result,
                    attempts,
                    fallback_reason,
                    explanation: None,
                };
            }

            let detail = result.message.clone().unwrap_or_else(|| {
                if hard > 0 {
                    format!("{} hard violations", hard)
                } else {
                    "no solution".to_string()
                }
            });
            let failure_status = if result.status.has_solution() {
                SolverStatus::Infeasible
            } else {
                result.status
            };
            let failure_reason = format!("{}: {}", failure_status, detail);
            tracing::warn!(solver = solver.name(), reason = %failure_reason, "solver attempt failed, falling back");
            attempts.push(SolverAttempt {
                solver_name: result.solver_name.clone(),
                status: failure_status,
                objective_score: None,
                elapsed_ms,
                failure_reason: Some(failure_reason),
            });

            let more_complete = best_partial
                .as_ref()
                .map_or(true, |best| result.assignments.len() > best.assignments.len());
            let stop = failure_status == SolverStatus::Aborted;
            if more_complete {
                best_partial = Some(result);
            }
            if stop {
                aborted = true;
                break;
            }
        }

        let final_status = if aborted {
            SolverStatus::Aborted
        } else if attempts.iter().any(|a| a.status == SolverStatus::Infeasible) {
            SolverStatus::Infeasible
        } else {
            SolverStatus::Timeout
        };
        let explanation = summarize_failures(&attempts).or_else(|| aborted.then(|| "cancelled".to_string()));
        let mut result = best_partial.unwrap_or_else(|| {
            SolveResult::empty("none", final_status, explanation.clone().unwrap_or_default())
        });
        result.status = final_status;

        FallbackOutcome {
            result,
            fallback_reason: summarize_failures(&attempts),
            attempts,
            explanation,
        }
    }
}

fn summarize_failures(attempts: &[SolverAttempt]) -> Option<String> {
    let reasons: Vec<String> = attempts
        .iter()
        .filter_map(|a| a.failure_reason.as_ref().map(|r| format!("{} {}", a.solver_name, r)))
        .collect();
    if reasons.is_empty() {
        None
    } else {
        Some(reasons.join("; "))
    }
}
