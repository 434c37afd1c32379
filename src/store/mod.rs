//! Persistence seam for the orchestration engine.
//!
//! Records are relational rows behind the [`TicketStore`] trait; the
//! in-memory backend is the default. A relational backend would slot in
//! behind the same trait, including the per-ticket advisory lock (row
//! locking there, a mutex table here).

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use crate::models::{
    Flow, FlowStatus, MachineEvent, MachinePool, PooledMachine, Ticket, TicketStatus, Todo,
    TodoHistory,
};

pub use memory::InMemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ticket {0} not found")]
    TicketNotFound(Uuid),
    #[error("flow {0} not found")]
    FlowNotFound(Uuid),
    #[error("todo {0} not found")]
    TodoNotFound(Uuid),
}

/// Storage contract for tickets, flows, todos, and the machine pool.
#[async_trait]
pub trait TicketStore: Send + Sync {
    // -- tickets --
    async fn insert_ticket(&self, ticket: Ticket) -> Result<(), StoreError>;
    async fn ticket(&self, id: Uuid) -> Result<Ticket, StoreError>;
    async fn set_ticket_status(&self, id: Uuid, status: TicketStatus) -> Result<(), StoreError>;
    /// Tickets whose status is not finished, oldest first.
    async fn active_tickets(&self) -> Result<Vec<Ticket>, StoreError>;
    /// Advisory lock serializing status recomputation for one ticket.
    async fn lock_ticket(&self, id: Uuid) -> OwnedMutexGuard<()>;

    // -- flows --
    async fn insert_flows(&self, flows: Vec<Flow>) -> Result<(), StoreError>;
    async fn flow(&self, id: Uuid) -> Result<Flow, StoreError>;
    /// All flows of a ticket in ordinal order.
    async fn ticket_flows(&self, ticket_id: Uuid) -> Result<Vec<Flow>, StoreError>;
    async fn set_flow_status(
        &self,
        id: Uuid,
        status: FlowStatus,
        error: Option<String>,
    ) -> Result<(), StoreError>;
    async fn set_flow_correlation(&self, id: Uuid, correlation_id: String)
        -> Result<(), StoreError>;
    async fn set_flow_details(&self, id: Uuid, details: serde_json::Value)
        -> Result<(), StoreError>;
    async fn mark_flow_started(&self, id: Uuid) -> Result<(), StoreError>;

    // -- todos --
    async fn insert_todo(&self, todo: Todo) -> Result<(), StoreError>;
    async fn todo(&self, id: Uuid) -> Result<Todo, StoreError>;
    async fn flow_todos(&self, flow_id: Uuid) -> Result<Vec<Todo>, StoreError>;
    async fn ticket_todos(&self, ticket_id: Uuid) -> Result<Vec<Todo>, StoreError>;
    async fn update_todo(&self, todo: Todo) -> Result<(), StoreError>;
    /// All todos not yet done, across tickets.
    async fn pending_todos(&self) -> Result<Vec<Todo>, StoreError>;
    async fn append_todo_history(&self, entry: TodoHistory) -> Result<(), StoreError>;
    async fn todo_history(&self, todo_id: Uuid) -> Result<Vec<TodoHistory>, StoreError>;

    // -- machine pool --
    async fn upsert_pool_record(&self, record: PooledMachine) -> Result<(), StoreError>;
    async fn pool_record(&self, host_id: u64) -> Result<Option<PooledMachine>, StoreError>;
    async fn remove_pool_record(&self, host_id: u64) -> Result<(), StoreError>;
    async fn pool_members(&self, pool: MachinePool) -> Result<Vec<PooledMachine>, StoreError>;
    async fn append_machine_event(&self, event: MachineEvent) -> Result<(), StoreError>;
    async fn latest_machine_event(&self, host_id: u64)
        -> Result<Option<MachineEvent>, StoreError>;
    async fn machine_events(&self, host_id: u64) -> Result<Vec<MachineEvent>, StoreError>;
}
