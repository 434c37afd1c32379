use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of human action a todo is waiting on. Matches the stage kind
/// that needs input, not the UI surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoType {
    /// Mirror of an external ITSM approval
    Itsm,
    /// Generic manual confirmation (pause stage)
    Approve,
    /// In-flow approval node inside a task graph
    InnerApprove,
    /// Resource pool ran short; retry once replenished
    ResourceReplenish,
    /// Task-graph failure awaiting a retry-or-terminate decision
    InnerFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Todo,
    Running,
    DoneSuccess,
    DoneFailed,
}

impl TodoStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, TodoStatus::DoneSuccess | TodoStatus::DoneFailed)
    }
}

/// Actions a user can take on a todo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoAction {
    /// Confirm / retry — resolves the todo as done-success
    Approve,
    /// Abort the waiting stage — resolves the todo as done-failed
    Terminate,
}

/// A human action item blocking one flow, denormalized onto its ticket.
///
/// Operators are the users who may act; helpers see the item but cannot
/// resolve it. Both lists are deduplicated and order-preserving, with
/// operators taking priority over helpers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Todo {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub flow_id: Uuid,
    pub todo_type: TodoType,
    pub name: String,
    pub operators: Vec<String>,
    pub helpers: Vec<String>,
    pub status: TodoStatus,
    pub done_by: Option<String>,
    pub done_at: Option<DateTime<Utc>>,
    /// Keys needed to resume the stage (flow id, ticket id, extras)
    pub context: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Todo {
    pub fn new(
        ticket_id: Uuid,
        flow_id: Uuid,
        todo_type: TodoType,
        name: impl Into<String>,
        operators: Vec<String>,
        helpers: Vec<String>,
        context: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticket_id,
            flow_id,
            todo_type,
            name: name.into(),
            operators,
            helpers,
            status: TodoStatus::Todo,
            done_by: None,
            done_at: None,
            context,
            created_at: Utc::now(),
        }
    }
}

/// Append-only audit record of an action taken on a todo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoHistory {
    pub id: Uuid,
    pub todo_id: Uuid,
    pub actor: String,
    pub action: TodoAction,
    pub created_at: DateTime<Utc>,
}

impl TodoHistory {
    pub fn new(todo_id: Uuid, actor: impl Into<String>, action: TodoAction) -> Self {
        Self {
            id: Uuid::new_v4(),
            todo_id,
            actor: actor.into(),
            action,
            created_at: Utc::now(),
        }
    }
}
