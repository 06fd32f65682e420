// ==========================================
// Residency Scheduler - Configuration layer
// ==========================================
// Policy values (duty-hour thresholds, weights, solver order) with
// defaults, overridable through the config_kv table.
// ==========================================

pub mod config_manager;
pub mod scheduling_config_trait;
pub mod scheduling_policy;

pub use config_manager::{config_keys, ConfigManager, ConfigScope};
pub use scheduling_config_trait::{SchedulingConfigReader, StaticConfigReader};
pub use scheduling_policy::{
    ConflictSettings, ControlSettings, ObjectiveWeights, SchedulingPolicy, SolverSettings,
    KNOWN_SOLVERS,
};
