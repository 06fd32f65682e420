// ==========================================
// Residency Scheduler - Config API
// ==========================================
// Query and update policy values, snapshot and restore.
// Every write to the global scope is re-read as a SchedulingPolicy and
// validated; an invalid result is reverted before returning.
// ==========================================

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::config::{ConfigManager, ConfigScope, SchedulingPolicy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigItem {
    pub scope_id: String,
    pub key: String,
    pub value: String,
}

pub struct ConfigApi {
    conn: Arc<Mutex<Connection>>,
    config_manager: Arc<ConfigManager>,
}

impl ConfigApi {
    pub fn new(conn: Arc<Mutex<Connection>>, config_manager: Arc<ConfigManager>) -> Self {
        Self { conn, config_manager }
    }

    fn get_conn(&self) -> ApiResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ApiError::DatabaseConnectionError(format!("lock acquisition failed: {}", e)))
    }

    pub fn list_configs(&self) -> ApiResult<Vec<ConfigItem>> {
        let conn = self.get_conn()?;
        let mut stmt = conn
            .prepare("SELECT scope_id, key, value FROM config_kv ORDER BY scope_id, key")
            .map_err(|e| ApiError::DatabaseError(e.to_string()))?;
        let configs = stmt
            .query_map([], |row| {
                Ok(ConfigItem {
                    scope_id: row.get(0)?,
                    key: row.get(1)?,
                    value: row.get(2)?,
                })
            })
            .map_err(|e| ApiError::DatabaseError(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ApiError::DatabaseError(e.to_string()))?;
        Ok(configs)
    }

    pub fn get_config(&self, scope_id: &str, key: &str) -> ApiResult<Option<ConfigItem>> {
        let conn = self.get_conn()?;
        let result = conn.query_row(
            "SELECT scope_id, key, value FROM config_kv WHERE scope_id = ?1 AND key = ?2",
            params![scope_id, key],
            |row| {
                Ok(ConfigItem {
                    scope_id: row.get(0)?,
                    key: row.get(1)?,
                    value: row.get(2)?,
                })
            },
        );
        match result {
            Ok(config) => Ok(Some(config)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(ApiError::DatabaseError(e.to_string())),
        }
    }

    /// Effective policy (defaults for missing keys), validated.
    pub fn get_policy(&self) -> ApiResult<SchedulingPolicy> {
        let policy = self
            .config_manager
            .read_policy()
            .map_err(|e| ApiError::ConfigError(e.to_string()))?;
        policy
            .validate()
            .map_err(|problems| ApiError::ConfigError(problems.join("; ")))?;
        Ok(policy)
    }

    /// Upsert one value.
    ///
    /// # Errors
    /// - `InvalidInput`: empty scope, key or reason
    /// - `ConfigError`: the resulting policy is invalid (the write is reverted)
    pub fn update_config(
        &self,
        scope_id: &str,
        key: &str,
        value: &str,
        operator: &str,
        reason: &str,
    ) -> ApiResult<()> {
        self.batch_update_configs(
            vec![ConfigItem {
                scope_id: scope_id.to_string(),
                key: key.to_string(),
                value: value.to_string(),
            }],
            operator,
            reason,
        )
        .map(|_| ())
    }

    /// Upsert several values in one transaction.
    ///
    /// # Returns
    /// Number of rows written
    pub fn batch_update_configs(&self, configs: Vec<ConfigItem>, operator: &str, reason: &str) -> ApiResult<usize> {
        if configs.is_empty() {
            return Err(ApiError::InvalidInput("config list is empty".to_string()));
        }
        for config in &configs {
            if config.scope_id.trim().is_empty() {
                return Err(ApiError::InvalidInput("scope id is required".to_string()));
            }
            if config.key.trim().is_empty() {
                return Err(ApiError::InvalidInput("config key is required".to_string()));
            }
        }
        require_reason(operator, reason)?;

        let previous = self.global_values()?;
        let count = {
            let mut conn = self.get_conn()?;
            let tx = conn
                .transaction()
                .map_err(|e| ApiError::DatabaseTransactionError(e.to_string()))?;
            let mut count = 0;
            for config in &configs {
                ensure_scope(&tx, &config.scope_id)?;
                count += tx
                    .execute(
                        "INSERT INTO config_kv (scope_id, key, value) VALUES (?1, ?2, ?3)
                         ON CONFLICT(scope_id, key) DO UPDATE SET value = ?3, updated_at = datetime('now')",
                        params![config.scope_id, config.key, config.value],
                    )
                    .map_err(|e| ApiError::DatabaseError(e.to_string()))?;
            }
            tx.commit()
                .map_err(|e| ApiError::DatabaseTransactionError(e.to_string()))?;
            count
        };

        self.validate_or_revert(&previous)?;
        tracing::info!(
            operator,
            reason,
            keys = ?configs.iter().map(|c| c.key.as_str()).collect::<Vec<_>>(),
            count,
            "config updated"
        );
        Ok(count)
    }

    /// JSON object of every global value.
    pub fn get_config_snapshot(&self) -> ApiResult<String> {
        self.config_manager
            .get_config_snapshot()
            .map_err(|e| ApiError::InternalError(e.to_string()))
    }

    /// Overwrite global values from a snapshot; reverted when invalid.
    pub fn restore_from_snapshot(&self, snapshot_json: &str, operator: &str, reason: &str) -> ApiResult<usize> {
        if snapshot_json.trim().is_empty() {
            return Err(ApiError::InvalidInput("snapshot JSON is empty".to_string()));
        }
        require_reason(operator, reason)?;

        let previous = self.global_values()?;
        let count = self
            .config_manager
            .restore_config_from_snapshot(snapshot_json)
            .map_err(|e| ApiError::InvalidInput(format!("snapshot rejected: {}", e)))?;

        self.validate_or_revert(&previous)?;
        tracing::info!(operator, reason, count, "config restored from snapshot");
        Ok(count)
    }

    fn global_values(&self) -> ApiResult<BTreeMap<String, String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn
            .prepare("SELECT key, value FROM config_kv WHERE scope_id = ?1")
            .map_err(|e| ApiError::DatabaseError(e.to_string()))?;
        let values = stmt
            .query_map(params![ConfigScope::Global.scope_id()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| ApiError::DatabaseError(e.to_string()))?
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map_err(|e| ApiError::DatabaseError(e.to_string()))?;
        Ok(values)
    }

    fn validate_or_revert(&self, previous: &BTreeMap<String, String>) -> ApiResult<()> {
        let problems = match self.config_manager.read_policy() {
            Ok(policy) => match policy.validate() {
                Ok(()) => return Ok(()),
                Err(problems) => problems,
            },
            Err(e) => vec![e.to_string()],
        };

        tracing::warn!(problems = ?problems, "config change rejected, reverting");
        self.revert_global(previous)?;
        Err(ApiError::ConfigError(problems.join("; ")))
    }

    fn revert_global(&self, previous: &BTreeMap<String, String>) -> ApiResult<()> {
        let scope = ConfigScope::Global.scope_id();
        let mut conn = self.get_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| ApiError::DatabaseTransactionError(e.to_string()))?;
        tx.execute("DELETE FROM config_kv WHERE scope_id = ?1", params![scope])
            .map_err(|e| ApiError::DatabaseError(e.to_string()))?;
        for (key, value) in previous {
            tx.execute(
                "INSERT INTO config_kv (scope_id, key, value) VALUES (?1, ?2, ?3)",
                params![scope, key, value],
            )
            .map_err(|e| ApiError::DatabaseError(e.to_string()))?;
        }
        tx.commit()
            .map_err(|e| ApiError::DatabaseTransactionError(e.to_string()))
    }
}

fn require_reason(operator: &str, reason: &str) -> ApiResult<()> {
    if operator.trim().is_empty() {
        return Err(ApiError::InvalidInput("operator is required".to_string()));
    }
    if reason.trim().is_empty() {
        return Err(ApiError::InvalidInput("reason is required".to_string()));
    }
    Ok(())
}

/// Program scopes are created on first write.
fn ensure_scope(conn: &Connection, scope_id: &str) -> ApiResult<()> {
    if scope_id == ConfigScope::Global.scope_id() {
        return Ok(());
    }
    let Some(program) = scope_id.strip_prefix("program/").filter(|p| !p.is_empty()) else {
        return Err(ApiError::InvalidInput(format!(
            "unknown scope {}, expected global or program/<code>",
            scope_id
        )));
    };
    conn.execute(
        "INSERT OR IGNORE INTO config_scope (scope_id, scope_type, scope_key) VALUES (?1, 'PROGRAM', ?2)",
        params![scope_id, program],
    )
    .map_err(|e| ApiError::DatabaseError(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::config_keys;
    use crate::db::init_schema;

    fn setup() -> ConfigApi {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        let manager = Arc::new(ConfigManager::from_connection(conn.clone()).unwrap());
        ConfigApi::new(conn, manager)
    }

    #[test]
    fn test_update_and_read_back() {
        let api = setup();
        api.update_config("global", config_keys::MAX_WEEKLY_HOURS, "72", "chief", "ACGME review")
            .unwrap();

        let item = api.get_config("global", config_keys::MAX_WEEKLY_HOURS).unwrap().unwrap();
        assert_eq!(item.value, "72");
        assert_eq!(api.get_policy().unwrap().max_weekly_hours, 72.0);
    }

    #[test]
    fn test_invalid_policy_is_reverted() {
        let api = setup();
        api.update_config("global", config_keys::MAX_WEEKLY_HOURS, "70", "chief", "tighten")
            .unwrap();

        let err = api
            .update_config("global", config_keys::MAX_WEEKLY_HOURS, "-5", "chief", "typo")
            .unwrap_err();
        assert!(matches!(err, ApiError::ConfigError(_)));
        let item = api.get_config("global", config_keys::MAX_WEEKLY_HOURS).unwrap().unwrap();
        assert_eq!(item.value, "70");
    }

    #[test]
    fn test_reason_required() {
        let api = setup();
        let err = api
            .update_config("global", config_keys::LOOKBACK_DAYS, "14", "chief", " ")
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));
        assert!(api.list_configs().unwrap().is_empty());
    }

    #[test]
    fn test_program_scope_created_on_write() {
        let api = setup();
        api.update_config("program/IM", config_keys::MAX_WEEKLY_HOURS, "75", "coordinator", "program override")
            .unwrap();
        assert!(api.get_config("program/IM", config_keys::MAX_WEEKLY_HOURS).unwrap().is_some());
        assert!(api
            .update_config("site/x", config_keys::MAX_WEEKLY_HOURS, "75", "coordinator", "bad scope")
            .is_err());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let api = setup();
        api.update_config("global", config_keys::REST_WINDOW_DAYS, "7", "chief", "baseline")
            .unwrap();
        let snapshot = api.get_config_snapshot().unwrap();
        api.update_config("global", config_keys::REST_WINDOW_DAYS, "14", "chief", "trial")
            .unwrap();

        let restored = api.restore_from_snapshot(&snapshot, "chief", "undo trial").unwrap();
        assert_eq!(restored, 1);
        let item = api.get_config("global", config_keys::REST_WINDOW_DAYS).unwrap().unwrap();
        assert_eq!(item.value, "7");
    }
}
