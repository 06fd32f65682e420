// ==========================================
// Residency Scheduler - Config manager
// ==========================================
// Responsibilities: load, query and overwrite policy configuration
// Storage: config_kv table (key-value + scope)
// ==========================================

use crate::config::scheduling_config_trait::SchedulingConfigReader;
use crate::config::scheduling_policy::SchedulingPolicy;
use crate::db::open_sqlite_connection;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use serde_json::json;
use std::collections::BTreeMap;
use std::error::Error;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

type ConfigResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

// ==========================================
// ConfigManager
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// Open a dedicated connection.
    pub fn new(db_path: &str) -> ConfigResult<Self> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Share an existing connection (PRAGMAs are re-applied, idempotent).
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> ConfigResult<Self> {
        {
            let conn_guard = conn
                .lock()
                .map_err(|e| format!("lock acquisition failed: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// Read one value from the global scope.
    fn get_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| format!("lock acquisition failed: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// Public read of a global value.
    pub fn get_global_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        self.get_config_value(key)
    }

    /// Upsert a global value.
    pub fn set_global_config_value(&self, key: &str, value: &str) -> ConfigResult<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| format!("lock acquisition failed: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        tracing::info!(config_key = key, value = value, "config updated");
        Ok(())
    }

    /// Parsed value or default; unparsable values fall back with a warning.
    fn get_parsed_or_default<T: FromStr>(&self, key: &str, default: T) -> ConfigResult<T> {
        match self.get_config_value(key)? {
            Some(raw) => match raw.trim().parse::<T>() {
                Ok(v) => Ok(v),
                Err(_) => {
                    tracing::warn!(config_key = key, raw_value = %raw, "unparsable config value, using default");
                    Ok(default)
                }
            },
            None => Ok(default),
        }
    }

    /// Snapshot of every global value as JSON (sorted keys).
    ///
    /// Stored on each ScheduleRun so a run can be reproduced.
    pub fn get_config_snapshot(&self) -> ConfigResult<String> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| format!("lock acquisition failed: {}", e))?;

        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let mut config_map: BTreeMap<String, String> = BTreeMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        let json_value = json!(config_map);
        Ok(serde_json::to_string(&json_value)?)
    }

    /// Restore global values from a snapshot (overwrites existing keys).
    ///
    /// # Returns
    /// Number of rows written
    pub fn restore_config_from_snapshot(&self, snapshot_json: &str) -> ConfigResult<usize> {
        let config_map: BTreeMap<String, String> = serde_json::from_str(snapshot_json)?;

        let mut conn = self
            .conn
            .lock()
            .map_err(|e| format!("lock acquisition failed: {}", e))?;
        let tx = conn.transaction()?;

        let mut count = 0;
        for (key, value) in config_map.iter() {
            count += tx.execute(
                "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
                 ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2",
                params![key, value],
            )?;
        }

        tx.commit()?;
        Ok(count)
    }

    /// Build the typed policy from config_kv.
    pub fn read_policy(&self) -> ConfigResult<SchedulingPolicy> {
        let d = SchedulingPolicy::default();
        let mut policy = SchedulingPolicy {
            max_weekly_hours: self.get_parsed_or_default(config_keys::MAX_WEEKLY_HOURS, d.max_weekly_hours)?,
            hours_window_weeks: self.get_parsed_or_default(config_keys::HOURS_WINDOW_WEEKS, d.hours_window_weeks)?,
            default_block_hours: self.get_parsed_or_default(config_keys::DEFAULT_BLOCK_HOURS, d.default_block_hours)?,
            rest_window_days: self.get_parsed_or_default(config_keys::REST_WINDOW_DAYS, d.rest_window_days)?,
            min_days_off_per_window: self
                .get_parsed_or_default(config_keys::MIN_DAYS_OFF_PER_WINDOW, d.min_days_off_per_window)?,
            lookback_days: self.get_parsed_or_default(config_keys::LOOKBACK_DAYS, d.lookback_days)?,
            rollback_window_hours: self
                .get_parsed_or_default(config_keys::ROLLBACK_WINDOW_HOURS, d.rollback_window_hours)?,
            ..d.clone()
        };

        // ===== weights =====
        let w = &mut policy.weights;
        w.template_balance = self.get_parsed_or_default(config_keys::WEIGHT_TEMPLATE_BALANCE, w.template_balance)?;
        w.preference = self.get_parsed_or_default(config_keys::WEIGHT_PREFERENCE, w.preference)?;
        w.continuity = self.get_parsed_or_default(config_keys::WEIGHT_CONTINUITY, w.continuity)?;
        w.fairness = self.get_parsed_or_default(config_keys::WEIGHT_FAIRNESS, w.fairness)?;
        w.coverage_reward = self.get_parsed_or_default(config_keys::WEIGHT_COVERAGE_REWARD, w.coverage_reward)?;

        // ===== solver =====
        if let Some(order) = self.get_config_value(config_keys::SOLVER_ORDER)? {
            policy.solver.order = order
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
        let s = &mut policy.solver;
        s.time_budget_ms = self.get_parsed_or_default(config_keys::SOLVER_TIME_BUDGET_MS, s.time_budget_ms)?;
        s.node_limit = self.get_parsed_or_default(config_keys::SOLVER_NODE_LIMIT, s.node_limit)?;
        s.allow_partial_commit =
            self.get_parsed_or_default(config_keys::SOLVER_ALLOW_PARTIAL_COMMIT, s.allow_partial_commit)?;
        s.default_seed = self.get_parsed_or_default(config_keys::SOLVER_DEFAULT_SEED, s.default_seed)?;

        // ===== control / conflict =====
        let c = &mut policy.control;
        c.check_interval = self.get_parsed_or_default(config_keys::CONTROL_CHECK_INTERVAL, c.check_interval)?;
        c.progress_interval_ms =
            self.get_parsed_or_default(config_keys::CONTROL_PROGRESS_INTERVAL_MS, c.progress_interval_ms)?;

        let k = &mut policy.conflict;
        k.keystone_redundancy =
            self.get_parsed_or_default(config_keys::CONFLICT_KEYSTONE_REDUNDANCY, k.keystone_redundancy)?;
        k.auto_resolve_min_confidence = self.get_parsed_or_default(
            config_keys::CONFLICT_AUTO_RESOLVE_MIN_CONFIDENCE,
            k.auto_resolve_min_confidence,
        )?;

        Ok(policy)
    }
}

// ==========================================
// SchedulingConfigReader implementation
// ==========================================
#[async_trait]
impl SchedulingConfigReader for ConfigManager {
    async fn load_policy(&self) -> ConfigResult<SchedulingPolicy> {
        self.read_policy()
    }

    async fn config_snapshot(&self) -> ConfigResult<String> {
        self.get_config_snapshot()
    }
}

// ==========================================
// ConfigScope
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigScope {
    Global,
    Program(String), // per residency program override
}

impl ConfigScope {
    pub fn scope_id(&self) -> String {
        match self {
            ConfigScope::Global => "global".to_string(),
            ConfigScope::Program(code) => format!("program/{}", code),
        }
    }
}

// ==========================================
// Config keys
// ==========================================
pub mod config_keys {
    // duty hours
    pub const MAX_WEEKLY_HOURS: &str = "max_weekly_hours";
    pub const HOURS_WINDOW_WEEKS: &str = "hours_window_weeks";
    pub const DEFAULT_BLOCK_HOURS: &str = "default_block_hours";

    // rest
    pub const REST_WINDOW_DAYS: &str = "rest_window_days";
    pub const MIN_DAYS_OFF_PER_WINDOW: &str = "min_days_off_per_window";
    pub const LOOKBACK_DAYS: &str = "lookback_days";

    // swaps
    pub const ROLLBACK_WINDOW_HOURS: &str = "rollback_window_hours";

    // objective weights
    pub const WEIGHT_TEMPLATE_BALANCE: &str = "weight.template_balance";
    pub const WEIGHT_PREFERENCE: &str = "weight.preference";
    pub const WEIGHT_CONTINUITY: &str = "weight.continuity";
    pub const WEIGHT_FAIRNESS: &str = "weight.fairness";
    pub const WEIGHT_COVERAGE_REWARD: &str = "weight.coverage_reward";

    // solver
    pub const SOLVER_ORDER: &str = "solver.order"; // csv
    pub const SOLVER_TIME_BUDGET_MS: &str = "solver.time_budget_ms";
    pub const SOLVER_NODE_LIMIT: &str = "solver.node_limit";
    pub const SOLVER_ALLOW_PARTIAL_COMMIT: &str = "solver.allow_partial_commit";
    pub const SOLVER_DEFAULT_SEED: &str = "solver.default_seed";

    // solver control
    pub const CONTROL_CHECK_INTERVAL: &str = "control.check_interval";
    pub const CONTROL_PROGRESS_INTERVAL_MS: &str = "control.progress_interval_ms";

    // conflicts
    pub const CONFLICT_KEYSTONE_REDUNDANCY: &str = "conflict.keystone_redundancy";
    pub const CONFLICT_AUTO_RESOLVE_MIN_CONFIDENCE: &str = "conflict.auto_resolve_min_confidence";
}
