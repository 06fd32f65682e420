// ==========================================
// Residency Scheduler - Scheduling config reader trait
// ==========================================
// Read-only configuration interface for the engine.
// Implemented by ConfigManager (config_kv table); tests may stub it.
// ==========================================

use crate::config::scheduling_policy::SchedulingPolicy;
use async_trait::async_trait;
use std::error::Error;

#[async_trait]
pub trait SchedulingConfigReader: Send + Sync {
    /// Full policy, with defaults for missing keys.
    ///
    /// Does not validate; callers run `SchedulingPolicy::validate`.
    async fn load_policy(&self) -> Result<SchedulingPolicy, Box<dyn Error + Send + Sync>>;

    /// JSON snapshot of the raw configuration, recorded on each ScheduleRun.
    async fn config_snapshot(&self) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// Fixed in-memory policy (tests, embedded callers).
#[derive(Debug, Clone, Default)]
pub struct StaticConfigReader {
    pub policy: SchedulingPolicy,
}

impl StaticConfigReader {
    pub fn new(policy: SchedulingPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl SchedulingConfigReader for StaticConfigReader {
    async fn load_policy(&self) -> Result<SchedulingPolicy, Box<dyn Error + Send + Sync>> {
        Ok(self.policy.clone())
    }

    async fn config_snapshot(&self) -> Result<String, Box<dyn Error + Send + Sync>> {
        Ok(serde_json::to_string(&self.policy)?)
    }
}
