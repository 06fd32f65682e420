// ==========================================
// Residency Scheduler - Swap API
// ==========================================

use std::sync::Arc;

use crate::api::dto::{SwapResponse, SwapValidationResponse};
use crate::api::error::{ApiError, ApiResult};
use crate::domain::swap::SwapRecord;
use crate::engine::swap::{SwapExecutor, SwapRequest};

pub struct SwapApi {
    executor: Arc<SwapExecutor>,
}

impl SwapApi {
    pub fn new(executor: Arc<SwapExecutor>) -> Self {
        Self { executor }
    }

    /// Dry-run a swap against the projected schedule. Writes nothing.
    pub fn validate_swap(&self, request: &SwapRequest) -> ApiResult<SwapValidationResponse> {
        let validation = self.executor.validate_swap(request)?;
        Ok(SwapValidationResponse::from(&validation))
    }

    /// Validate and apply a swap.
    ///
    /// A BLOCKED decision is returned as `ConstraintViolation` with the
    /// blocking violations attached; nothing is written in that case.
    /// Replaying the same idempotency key returns the stored record.
    pub fn execute_swap(&self, request: &SwapRequest) -> ApiResult<SwapResponse> {
        let outcome = self.executor.execute_swap(request)?;
        let response = SwapResponse::from(&outcome);
        if !response.validation.allowed {
            return Err(ApiError::ConstraintViolation {
                reason: format!(
                    "swap of {} blocked by {}",
                    request.source_assignment_id,
                    outcome.decision.blocked_codes().join(", ")
                ),
                violations: response.validation.blocking,
            });
        }
        Ok(response)
    }

    pub fn rollback_swap(&self, swap_id: &str, actor: &str) -> ApiResult<SwapRecord> {
        if actor.trim().is_empty() {
            return Err(ApiError::InvalidInput("actor is required".to_string()));
        }
        Ok(self.executor.rollback_swap(swap_id, actor)?)
    }

    pub fn get_swap(&self, swap_id: &str) -> ApiResult<SwapRecord> {
        self.executor
            .get_swap(swap_id)?
            .ok_or_else(|| ApiError::NotFound(format!("SwapRecord (id={})", swap_id)))
    }

    pub fn list_swaps_for_person(&self, person_id: &str) -> ApiResult<Vec<SwapRecord>> {
        Ok(self.executor.list_swaps_for_person(person_id)?)
    }
}
