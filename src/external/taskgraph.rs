//! Task-graph execution engine contract.
//!
//! The engine runs the detailed, per-engine operational steps; the core
//! only needs kickoff, a status poll, and revocation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::external::ExternalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskGraphState {
    Created,
    Ready,
    Running,
    Suspended,
    Finished,
    Failed,
    Revoked,
    Expired,
}

/// States the core treats as execution failure. Consulted structurally —
/// membership, not equality.
pub const FAILED_STATES: &[TaskGraphState] = &[TaskGraphState::Failed, TaskGraphState::Expired];

impl TaskGraphState {
    pub fn is_failed(&self) -> bool {
        FAILED_STATES.contains(self)
    }
}

#[async_trait]
pub trait TaskGraphEngine: Send + Sync {
    /// Kick off a task graph built from the flow's details; returns the
    /// root id addressing the graph. Kickoff is synchronous-fast, the
    /// execution itself is asynchronous.
    async fn start(&self, graph: &serde_json::Value) -> Result<String, ExternalError>;

    async fn state(&self, root_id: &str) -> Result<TaskGraphState, ExternalError>;

    async fn revoke(&self, root_id: &str) -> Result<(), ExternalError>;
}
