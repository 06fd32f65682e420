// ==========================================
// Residency Scheduler - API layer
// ==========================================
// Facades over the engine for embedding callers and the CLI.
// Inputs are validated here; errors carry a structured reason.
// ==========================================

pub mod config_api;
pub mod conflict_api;
pub mod dto;
pub mod error;
pub mod schedule_api;
pub mod swap_api;

pub use config_api::{ConfigApi, ConfigItem};
pub use conflict_api::ConflictApi;
pub use dto::{AssignmentDto, GenerateResponse, RunSummary, SwapResponse, SwapValidationResponse, ViolationDto};
pub use error::{ApiError, ApiResult};
pub use schedule_api::ScheduleApi;
pub use swap_api::SwapApi;
