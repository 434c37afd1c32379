//! In-memory [`TicketStore`] backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::models::{
    Flow, FlowStatus, MachineEvent, MachinePool, PooledMachine, Ticket, TicketStatus, Todo,
    TodoHistory,
};
use crate::store::{StoreError, TicketStore};

#[derive(Default)]
struct Tables {
    tickets: HashMap<Uuid, Ticket>,
    flows: HashMap<Uuid, Flow>,
    todos: HashMap<Uuid, Todo>,
    todo_history: Vec<TodoHistory>,
    pool: HashMap<u64, PooledMachine>,
    machine_events: Vec<MachineEvent>,
}

/// Map-backed store. The per-ticket lock table hands out owned guards so
/// callers can hold the lock across awaits.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    ticket_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TicketStore for InMemoryStore {
    async fn insert_ticket(&self, ticket: Ticket) -> Result<(), StoreError> {
        self.tables.write().await.tickets.insert(ticket.id, ticket);
        Ok(())
    }

    async fn ticket(&self, id: Uuid) -> Result<Ticket, StoreError> {
        self.tables
            .read()
            .await
            .tickets
            .get(&id)
            .cloned()
            .ok_or(StoreError::TicketNotFound(id))
    }

    async fn set_ticket_status(&self, id: Uuid, status: TicketStatus) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let ticket = tables
            .tickets
            .get_mut(&id)
            .ok_or(StoreError::TicketNotFound(id))?;
        ticket.status = status;
        ticket.updated_at = Utc::now();
        Ok(())
    }

    async fn active_tickets(&self) -> Result<Vec<Ticket>, StoreError> {
        let tables = self.tables.read().await;
        let mut active: Vec<Ticket> = tables
            .tickets
            .values()
            .filter(|t| !t.status.is_finished())
            .cloned()
            .collect();
        active.sort_by_key(|t| t.created_at);
        Ok(active)
    }

    async fn lock_ticket(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.ticket_locks.lock().await;
            Arc::clone(locks.entry(id).or_default())
        };
        lock.lock_owned().await
    }

    async fn insert_flows(&self, flows: Vec<Flow>) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        for flow in flows {
            tables.flows.insert(flow.id, flow);
        }
        Ok(())
    }

    async fn flow(&self, id: Uuid) -> Result<Flow, StoreError> {
        self.tables
            .read()
            .await
            .flows
            .get(&id)
            .cloned()
            .ok_or(StoreError::FlowNotFound(id))
    }

    async fn ticket_flows(&self, ticket_id: Uuid) -> Result<Vec<Flow>, StoreError> {
        let tables = self.tables.read().await;
        let mut flows: Vec<Flow> = tables
            .flows
            .values()
            .filter(|f| f.ticket_id == ticket_id)
            .cloned()
            .collect();
        flows.sort_by_key(|f| f.ordinal);
        Ok(flows)
    }

    async fn set_flow_status(
        &self,
        id: Uuid,
        status: FlowStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let flow = tables.flows.get_mut(&id).ok_or(StoreError::FlowNotFound(id))?;
        flow.status = status;
        if error.is_some() {
            flow.error = error;
        }
        if status.is_finished() && flow.ended_at.is_none() {
            flow.ended_at = Some(Utc::now());
        }
        if !status.is_finished() {
            // A retry reopens the flow
            flow.ended_at = None;
        }
        flow.updated_at = Utc::now();
        Ok(())
    }

    async fn set_flow_correlation(
        &self,
        id: Uuid,
        correlation_id: String,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let flow = tables.flows.get_mut(&id).ok_or(StoreError::FlowNotFound(id))?;
        flow.correlation_id = Some(correlation_id);
        flow.updated_at = Utc::now();
        Ok(())
    }

    async fn set_flow_details(
        &self,
        id: Uuid,
        details: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let flow = tables.flows.get_mut(&id).ok_or(StoreError::FlowNotFound(id))?;
        flow.details = details;
        flow.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_flow_started(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let flow = tables.flows.get_mut(&id).ok_or(StoreError::FlowNotFound(id))?;
        if flow.started_at.is_none() {
            flow.started_at = Some(Utc::now());
        }
        flow.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_todo(&self, todo: Todo) -> Result<(), StoreError> {
        self.tables.write().await.todos.insert(todo.id, todo);
        Ok(())
    }

    async fn todo(&self, id: Uuid) -> Result<Todo, StoreError> {
        self.tables
            .read()
            .await
            .todos
            .get(&id)
            .cloned()
            .ok_or(StoreError::TodoNotFound(id))
    }

    async fn flow_todos(&self, flow_id: Uuid) -> Result<Vec<Todo>, StoreError> {
        let tables = self.tables.read().await;
        let mut todos: Vec<Todo> = tables
            .todos
            .values()
            .filter(|t| t.flow_id == flow_id)
            .cloned()
            .collect();
        todos.sort_by_key(|t| t.created_at);
        Ok(todos)
    }

    async fn ticket_todos(&self, ticket_id: Uuid) -> Result<Vec<Todo>, StoreError> {
        let tables = self.tables.read().await;
        let mut todos: Vec<Todo> = tables
            .todos
            .values()
            .filter(|t| t.ticket_id == ticket_id)
            .cloned()
            .collect();
        todos.sort_by_key(|t| t.created_at);
        Ok(todos)
    }

    async fn update_todo(&self, todo: Todo) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.todos.contains_key(&todo.id) {
            return Err(StoreError::TodoNotFound(todo.id));
        }
        tables.todos.insert(todo.id, todo);
        Ok(())
    }

    async fn pending_todos(&self) -> Result<Vec<Todo>, StoreError> {
        let tables = self.tables.read().await;
        let mut todos: Vec<Todo> = tables
            .todos
            .values()
            .filter(|t| !t.status.is_done())
            .cloned()
            .collect();
        todos.sort_by_key(|t| t.created_at);
        Ok(todos)
    }

    async fn append_todo_history(&self, entry: TodoHistory) -> Result<(), StoreError> {
        self.tables.write().await.todo_history.push(entry);
        Ok(())
    }

    async fn todo_history(&self, todo_id: Uuid) -> Result<Vec<TodoHistory>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .todo_history
            .iter()
            .filter(|h| h.todo_id == todo_id)
            .cloned()
            .collect())
    }

    async fn upsert_pool_record(&self, record: PooledMachine) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .pool
            .insert(record.host.host_id, record);
        Ok(())
    }

    async fn pool_record(&self, host_id: u64) -> Result<Option<PooledMachine>, StoreError> {
        Ok(self.tables.read().await.pool.get(&host_id).cloned())
    }

    async fn remove_pool_record(&self, host_id: u64) -> Result<(), StoreError> {
        self.tables.write().await.pool.remove(&host_id);
        Ok(())
    }

    async fn pool_members(&self, pool: MachinePool) -> Result<Vec<PooledMachine>, StoreError> {
        let tables = self.tables.read().await;
        let mut members: Vec<PooledMachine> = tables
            .pool
            .values()
            .filter(|m| m.pool == pool)
            .cloned()
            .collect();
        members.sort_by_key(|m| m.host.host_id);
        Ok(members)
    }

    async fn append_machine_event(&self, event: MachineEvent) -> Result<(), StoreError> {
        self.tables.write().await.machine_events.push(event);
        Ok(())
    }

    async fn latest_machine_event(
        &self,
        host_id: u64,
    ) -> Result<Option<MachineEvent>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .machine_events
            .iter()
            .rev()
            .find(|e| e.host.host_id == host_id)
            .cloned())
    }

    async fn machine_events(&self, host_id: u64) -> Result<Vec<MachineEvent>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .machine_events
            .iter()
            .filter(|e| e.host.host_id == host_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FlowType, Host, MachineEventType, TicketType};

    #[tokio::test]
    async fn ticket_flows_come_back_in_ordinal_order() {
        let store = InMemoryStore::new();
        let ticket = Ticket::new(1, TicketType::ClusterApply, "alice", "mysql", serde_json::json!({}));
        let ticket_id = ticket.id;
        store.insert_ticket(ticket).await.unwrap();

        let flows = vec![
            Flow::new(ticket_id, FlowType::InnerFlow, 2, serde_json::json!({})),
            Flow::new(ticket_id, FlowType::ExternalApproval, 0, serde_json::json!({})),
            Flow::new(ticket_id, FlowType::ResourceApply, 1, serde_json::json!({})),
        ];
        store.insert_flows(flows).await.unwrap();

        let ordered = store.ticket_flows(ticket_id).await.unwrap();
        let kinds: Vec<FlowType> = ordered.iter().map(|f| f.flow_type).collect();
        assert_eq!(
            kinds,
            vec![
                FlowType::ExternalApproval,
                FlowType::ResourceApply,
                FlowType::InnerFlow
            ]
        );
    }

    #[tokio::test]
    async fn latest_machine_event_is_most_recent_append() {
        let store = InMemoryStore::new();
        let host = Host::new(7, "10.0.0.7");
        store
            .append_machine_event(MachineEvent::new(
                host.clone(),
                MachineEventType::ImportResource,
                None,
                "ops",
            ))
            .await
            .unwrap();
        store
            .append_machine_event(MachineEvent::new(
                host.clone(),
                MachineEventType::ApplyResource,
                None,
                "ops",
            ))
            .await
            .unwrap();

        let latest = store.latest_machine_event(7).await.unwrap().unwrap();
        assert_eq!(latest.event, MachineEventType::ApplyResource);
    }

    #[tokio::test]
    async fn finished_flow_gets_an_end_timestamp() {
        let store = InMemoryStore::new();
        let flow = Flow::new(Uuid::new_v4(), FlowType::Pause, 0, serde_json::json!({}));
        let flow_id = flow.id;
        store.insert_flows(vec![flow]).await.unwrap();

        store
            .set_flow_status(flow_id, FlowStatus::Succeeded, None)
            .await
            .unwrap();
        let flow = store.flow(flow_id).await.unwrap();
        assert!(flow.ended_at.is_some());
    }
}
