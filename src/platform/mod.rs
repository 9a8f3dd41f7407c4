//! Actor platform collaborator.
//!
//! Launcher and monitor only talk to the platform through [`ActorPlatform`], so
//! tests can substitute a scripted backend for the HTTP client.

mod apify;

pub use apify::{ApifyClient, Credential};

use crate::error::ApiError;
use crate::model::{ActorSummary, Identity, InputSchema, RunHandle, RunSnapshot};
use async_trait::async_trait;

#[async_trait]
pub trait ActorPlatform: Send + Sync {
    /// Resolve the account behind the configured credential.
    async fn validate_credential(&self) -> Result<Identity, ApiError>;

    async fn list_actors(&self) -> Result<Vec<ActorSummary>, ApiError>;

    async fn actor_input_schema(&self, actor_id: &str) -> Result<InputSchema, ApiError>;

    /// Start one run. Not idempotent: callers must never retry this implicitly.
    async fn start_run(
        &self,
        actor_id: &str,
        input: &serde_json::Value,
    ) -> Result<RunHandle, ApiError>;

    async fn run_status(&self, run_id: &str) -> Result<RunSnapshot, ApiError>;

    async fn result_items(&self, result_pointer: &str)
        -> Result<Vec<serde_json::Value>, ApiError>;
}
