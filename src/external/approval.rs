//! External approval (ITSM) service contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::external::ExternalError;

/// Status reported by the approval service for one of its tickets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Running,
    Finished,
    Terminated,
    Revoked,
}

/// Point-in-time approval outcome for a serial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalSnapshot {
    pub state: ApprovalState,
    /// Meaningful only when `state` is Finished
    pub approved: bool,
    pub updated_at: Option<DateTime<Utc>>,
    pub ticket_url: String,
}

impl Default for ApprovalSnapshot {
    fn default() -> Self {
        Self {
            state: ApprovalState::Running,
            approved: false,
            updated_at: None,
            ticket_url: String::new(),
        }
    }
}

/// One node log entry of the external approval flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalLogEntry {
    pub operator: String,
    pub message: String,
}

/// Boundary contract of the external approval system.
#[async_trait]
pub trait ApprovalService: Send + Sync {
    /// Create an approval ticket; returns the service's serial number.
    async fn create_ticket(&self, payload: &serde_json::Value) -> Result<String, ExternalError>;

    async fn approval_result(&self, serial: &str) -> Result<ApprovalSnapshot, ExternalError>;

    async fn ticket_logs(&self, serial: &str) -> Result<Vec<ApprovalLogEntry>, ExternalError>;

    /// Withdraw a pending approval on behalf of `operator`.
    async fn withdraw(&self, serial: &str, operator: &str) -> Result<(), ExternalError>;
}
