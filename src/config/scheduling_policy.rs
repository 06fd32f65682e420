use serde::{Deserialize, Serialize};

/// Solver backend names accepted in `solver.order`.
pub const KNOWN_SOLVERS: [&str; 3] = ["cp_sat", "milp", "greedy"];

/// Business policy values consumed by the engine.
///
/// Stored as `config_kv` rows (scope_id='global'); any missing key keeps its
/// default. The numeric regulatory thresholds are configuration, never code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulingPolicy {
    // ===== duty hours =====
    /// Average weekly hour ceiling over a rolling window
    #[serde(default = "default_max_weekly_hours")]
    pub max_weekly_hours: f64,

    /// Rolling window length in weeks
    #[serde(default = "default_hours_window_weeks")]
    pub hours_window_weeks: u32,

    /// Hours credited for one half-day block (block-duration accounting)
    #[serde(default = "default_block_hours")]
    pub default_block_hours: f64,

    // ===== rest =====
    #[serde(default = "default_rest_window_days")]
    pub rest_window_days: u32,

    #[serde(default = "default_min_days_off")]
    pub min_days_off_per_window: u32,

    /// History loaded before the range start for rolling windows
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    // ===== swaps =====
    #[serde(default = "default_rollback_window_hours")]
    pub rollback_window_hours: i64,

    #[serde(default)]
    pub weights: ObjectiveWeights,

    #[serde(default)]
    pub solver: SolverSettings,

    #[serde(default)]
    pub control: ControlSettings,

    #[serde(default)]
    pub conflict: ConflictSettings,
}

/// Soft constraint weights (lower objective is better).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveWeights {
    pub template_balance: f64,
    pub preference: f64,
    pub continuity: f64,
    pub fairness: f64,
    /// Reward per placed assignment; keeps solvers from leaving seats empty
    pub coverage_reward: f64,
}

impl Default for ObjectiveWeights {
    fn default() -> Self {
        Self {
            template_balance: 5.0,
            preference: 2.0,
            continuity: 1.0,
            fairness: 1.0,
            coverage_reward: 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverSettings {
    /// Fallback priority order
    pub order: Vec<String>,
    /// Wall-clock safety budget per backend
    pub time_budget_ms: u64,
    /// Deterministic work budget per backend (search nodes)
    pub node_limit: u64,
    /// Commit ABORTED partial results
    pub allow_partial_commit: bool,
    pub default_seed: u64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            order: KNOWN_SOLVERS.iter().map(|s| s.to_string()).collect(),
            time_budget_ms: 30_000,
            node_limit: 200_000,
            allow_partial_commit: false,
            default_seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlSettings {
    /// Iterations between cancellation checks
    pub check_interval: u64,
    /// Minimum interval between progress publications
    pub progress_interval_ms: u64,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            check_interval: 256,
            progress_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictSettings {
    /// A person/template with at most this many qualified alternates is a keystone
    pub keystone_redundancy: u32,
    /// Below this confidence a fix is only proposed, never applied
    pub auto_resolve_min_confidence: f64,
}

impl Default for ConflictSettings {
    fn default() -> Self {
        Self {
            keystone_redundancy: 1,
            auto_resolve_min_confidence: 0.8,
        }
    }
}

fn default_max_weekly_hours() -> f64 {
    80.0
}
fn default_hours_window_weeks() -> u32 {
    4
}
fn default_block_hours() -> f64 {
    6.0
}
fn default_rest_window_days() -> u32 {
    7
}
fn default_min_days_off() -> u32 {
    1
}
fn default_lookback_days() -> u32 {
    28
}
fn default_rollback_window_hours() -> i64 {
    24
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        Self {
            max_weekly_hours: default_max_weekly_hours(),
            hours_window_weeks: default_hours_window_weeks(),
            default_block_hours: default_block_hours(),
            rest_window_days: default_rest_window_days(),
            min_days_off_per_window: default_min_days_off(),
            lookback_days: default_lookback_days(),
            rollback_window_hours: default_rollback_window_hours(),
            weights: ObjectiveWeights::default(),
            solver: SolverSettings::default(),
            control: ControlSettings::default(),
            conflict: ConflictSettings::default(),
        }
    }
}

impl SchedulingPolicy {
    /// Days in the duty-hour window (4 weeks → 28).
    pub fn hours_window_days(&self) -> u32 {
        self.hours_window_weeks * 7
    }

    /// Longest rolling window any hard rule looks at, in days.
    pub fn longest_window_days(&self) -> u32 {
        self.hours_window_days().max(self.rest_window_days)
    }

    /// Total hour ceiling over one duty-hour window.
    pub fn hours_window_limit(&self) -> f64 {
        self.max_weekly_hours * self.hours_window_weeks as f64
    }

    /// Maximum worked days inside one rest window.
    pub fn max_worked_days_per_rest_window(&self) -> u32 {
        self.rest_window_days
            .saturating_sub(self.min_days_off_per_window)
    }

    /// Reject contradictory or out-of-range values.
    ///
    /// # Returns
    /// - Ok(()) when usable
    /// - Err(problems) listing every offending key
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        if !(self.max_weekly_hours > 0.0 && self.max_weekly_hours <= 168.0) {
            problems.push(format!(
                "max_weekly_hours={} must be in (0, 168]",
                self.max_weekly_hours
            ));
        }
        if self.hours_window_weeks == 0 {
            problems.push("hours_window_weeks must be >= 1".to_string());
        }
        if !(self.default_block_hours > 0.0 && self.default_block_hours <= 24.0) {
            problems.push(format!(
                "default_block_hours={} must be in (0, 24]",
                self.default_block_hours
            ));
        }
        if self.rest_window_days < 2 {
            problems.push("rest_window_days must be >= 2".to_string());
        }
        if self.min_days_off_per_window == 0
            || self.min_days_off_per_window >= self.rest_window_days
        {
            problems.push(format!(
                "min_days_off_per_window={} must be in [1, rest_window_days={})",
                self.min_days_off_per_window, self.rest_window_days
            ));
        }
        if self.rollback_window_hours < 0 {
            problems.push("rollback_window_hours must be >= 0".to_string());
        }

        let w = &self.weights;
        for (name, value) in [
            ("weight.template_balance", w.template_balance),
            ("weight.preference", w.preference),
            ("weight.continuity", w.continuity),
            ("weight.fairness", w.fairness),
            ("weight.coverage_reward", w.coverage_reward),
        ] {
            if !value.is_finite() || value < 0.0 {
                problems.push(format!("{}={} must be a finite non-negative number", name, value));
            }
        }
        if w.template_balance <= 0.0 {
            problems.push("weight.template_balance must be > 0 (template concentration guard)".to_string());
        }
        if w.coverage_reward <= 0.0 {
            problems.push("weight.coverage_reward must be > 0".to_string());
        }

        if self.solver.order.is_empty() {
            problems.push("solver.order must name at least one backend".to_string());
        }
        let mut seen = Vec::new();
        for name in &self.solver.order {
            if !KNOWN_SOLVERS.contains(&name.as_str()) {
                problems.push(format!("solver.order contains unknown backend '{}'", name));
            }
            if seen.contains(name) {
                problems.push(format!("solver.order lists '{}' twice", name));
            }
            seen.push(name.clone());
        }
        if self.solver.node_limit == 0 {
            problems.push("solver.node_limit must be > 0".to_string());
        }
        if self.control.check_interval == 0 {
            problems.push("control.check_interval must be > 0".to_string());
        }
        let c = self.conflict.auto_resolve_min_confidence;
        if !(0.0..=1.0).contains(&c) {
            problems.push(format!(
                "conflict.auto_resolve_min_confidence={} must be in [0, 1]",
                c
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_valid() {
        let policy = SchedulingPolicy::default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.hours_window_days(), 28);
        assert_eq!(policy.hours_window_limit(), 320.0);
        assert_eq!(policy.max_worked_days_per_rest_window(), 6);
    }

    #[test]
    fn test_contradictory_rest_window_rejected() {
        let mut policy = SchedulingPolicy::default();
        policy.rest_window_days = 7;
        policy.min_days_off_per_window = 7;
        let problems = policy.validate().unwrap_err();
        assert!(problems.iter().any(|p| p.contains("min_days_off_per_window")));
    }

    #[test]
    fn test_negative_weight_and_unknown_solver_rejected() {
        let mut policy = SchedulingPolicy::default();
        policy.weights.fairness = -1.0;
        policy.solver.order = vec!["greedy".to_string(), "gurobi".to_string()];
        let problems = policy.validate().unwrap_err();
        assert!(problems.iter().any(|p| p.contains("weight.fairness")));
        assert!(problems.iter().any(|p| p.contains("gurobi")));
    }

    #[test]
    fn test_zero_template_balance_rejected() {
        let mut policy = SchedulingPolicy::default();
        policy.weights.template_balance = 0.0;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let policy: SchedulingPolicy =
            serde_json::from_str(r#"{"max_weekly_hours": 72.0}"#).unwrap();
        assert_eq!(policy.max_weekly_hours, 72.0);
        assert_eq!(policy.rest_window_days, 7);
        assert_eq!(policy.solver.order, vec!["cp_sat", "milp", "greedy"]);
    }
}
