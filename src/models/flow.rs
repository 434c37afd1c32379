use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stage kind of a flow. The concrete stage behavior is selected from
/// this tag by `crate::stages::TicketStage::for_flow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    /// External approval through the ITSM service
    ExternalApproval,
    /// Task-graph execution on the internal engine
    InnerFlow,
    /// Task-graph execution, fast path (no retry todo on failure)
    QuickInnerFlow,
    /// Task-graph kickoff whose outcome is deliberately ignored
    IgnoreResultInnerFlow,
    /// Manual pause, resolved by a confirmation todo
    Pause,
    /// Wait until a stored trigger time
    Timer,
    ResourceApply,
    ResourceBatchApply,
    ResourceDeliver,
    ResourceBatchDeliver,
    /// Informational stage, succeeds immediately
    DescribeTask,
}

impl FlowType {
    pub fn is_inner(&self) -> bool {
        matches!(
            self,
            FlowType::InnerFlow | FlowType::QuickInnerFlow | FlowType::IgnoreResultInnerFlow
        )
    }

    pub fn is_resource_apply(&self) -> bool {
        matches!(self, FlowType::ResourceApply | FlowType::ResourceBatchApply)
    }

    pub fn is_resource_deliver(&self) -> bool {
        matches!(
            self,
            FlowType::ResourceDeliver | FlowType::ResourceBatchDeliver
        )
    }
}

/// Execution status of one flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    /// Created, predecessor not done yet
    Ready,
    Running,
    Succeeded,
    Failed,
    Terminated,
    Revoked,
}

impl FlowStatus {
    /// The finished set: a successor may start once its predecessor's
    /// computed status lands here.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            FlowStatus::Succeeded
                | FlowStatus::Failed
                | FlowStatus::Terminated
                | FlowStatus::Revoked
        )
    }
}

/// One stage instance belonging to a ticket.
///
/// Created in bulk by the ticket builder; `details` is mutated by the
/// owning stage while it executes (a resource-apply stage writes the
/// allocated hosts into the next flow's details). Read-only once the
/// status is finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub flow_type: FlowType,
    /// Position in the ticket's stage sequence
    pub ordinal: u32,
    pub status: FlowStatus,
    /// External handle: ITSM ticket serial, task-graph root id
    pub correlation_id: Option<String>,
    pub details: serde_json::Value,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Flow {
    pub fn new(ticket_id: Uuid, flow_type: FlowType, ordinal: u32, details: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            ticket_id,
            flow_type,
            ordinal,
            status: FlowStatus::Ready,
            correlation_id: None,
            details,
            error: None,
            started_at: None,
            ended_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
