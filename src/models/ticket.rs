use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Operational request kinds the platform can execute.
///
/// Each type expands into a fixed flow sequence via the builder table
/// (`crate::builders::flow_sequence`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketType {
    /// Deploy a new cluster on freshly allocated hosts
    ClusterApply,
    /// Add capacity to an existing cluster
    ClusterScaleOut,
    /// Tear a cluster down after a manual confirmation
    ClusterDestroy,
    /// Switch cluster roles at a scheduled time
    ClusterSwitch,
    /// Return hosts that finished their lifecycle
    HostRecycle,
}

impl TicketType {
    /// Apply-type tickets consume hosts from the resource pool; their
    /// inner-flow failures quarantine those hosts (dirty pool hook).
    pub fn is_apply(&self) -> bool {
        matches!(self, TicketType::ClusterApply | TicketType::ClusterScaleOut)
    }
}

/// Ticket lifecycle status.
///
/// Always a pure function of the status set of the ticket's flows; only
/// `TicketFlowManager::update_ticket_status` writes it. Waiting flavors
/// (Approving/AwaitingConfirm/Scheduled/ResourceReplenish) exist so the
/// running→mapped aggregation rule is a total static table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Created, no flow started yet
    Pending,
    /// External approval in progress
    Approving,
    /// Paused on a human confirmation todo
    AwaitingConfirm,
    /// Waiting for a timer to fire
    Scheduled,
    /// Resource allocation waiting on pool replenishment
    ResourceReplenish,
    /// A flow is executing
    Running,
    Succeeded,
    Failed,
    Revoked,
    Terminated,
}

impl TicketStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TicketStatus::Succeeded
                | TicketStatus::Failed
                | TicketStatus::Revoked
                | TicketStatus::Terminated
        )
    }
}

/// One operational change request, owning an ordered flow sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub biz_id: u64,
    pub ticket_type: TicketType,
    pub status: TicketStatus,
    pub creator: String,
    /// Database group the ticket targets (DBA directory lookup key)
    pub group: String,
    pub remark: String,
    /// Free-form parameters interpreted by the type-specific builder
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    pub fn new(
        biz_id: u64,
        ticket_type: TicketType,
        creator: impl Into<String>,
        group: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            biz_id,
            ticket_type,
            status: TicketStatus::Pending,
            creator: creator.into(),
            group: group.into(),
            remark: String::new(),
            details,
            created_at: now,
            updated_at: now,
        }
    }
}
