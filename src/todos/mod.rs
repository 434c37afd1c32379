//! Todo/approval subsystem: who must act on a waiting stage, and what
//! happens when they do.

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::external::{DbaDirectory, Notifier};
use crate::manager;
use crate::models::{
    Flow, FlowStatus, Ticket, Todo, TodoAction, TodoHistory, TodoStatus, TodoType,
};
use crate::services::Services;
use crate::stages::{FlowStage, StageError, TicketStage};
use crate::store::{StoreError, TicketStore};

#[derive(Debug, Error)]
pub enum TodoError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{actor} may not act on todo {todo_id}")]
    NotAllowed { actor: String, todo_id: Uuid },
    #[error("stage retry failed: {0}")]
    RetryFailed(String),
    #[error("ticket advance failed: {0}")]
    Advance(String),
}

/// Deduplicate, keeping first occurrence order.
fn dedup_preserving(names: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = Vec::new();
    for name in names {
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

pub struct TodoManager {
    services: Services,
}

impl TodoManager {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    /// Applicable users for a todo of `todo_type` on `ticket`:
    /// (operators, helpers) from the per-type table, deduplicated but
    /// before base-operator union and operator-priority subtraction.
    pub async fn resolve_actors(
        &self,
        ticket: &Ticket,
        todo_type: TodoType,
    ) -> (Vec<String>, Vec<String>) {
        let (operators, helpers) = match todo_type {
            TodoType::Itsm => {
                let approvers = self.services.dba.approvers(ticket.biz_id).await;
                let mut approvers = approvers.into_iter();
                let operators: Vec<String> = approvers.next().into_iter().collect();
                (operators, approvers.collect())
            }
            TodoType::Approve => {
                let dbas = self
                    .services
                    .dba
                    .dba_group(ticket.biz_id, &ticket.group)
                    .await;
                (vec![ticket.creator.clone()], dbas.assistance)
            }
            TodoType::InnerApprove | TodoType::ResourceReplenish | TodoType::InnerFailed => {
                let dbas = self
                    .services
                    .dba
                    .dba_group(ticket.biz_id, &ticket.group)
                    .await;
                let operators: Vec<String> = std::iter::once(ticket.creator.clone())
                    .chain(dbas.primary)
                    .collect();
                let helpers: Vec<String> = dbas
                    .assistance
                    .into_iter()
                    .chain(dbas.secondary)
                    .chain(dbas.others)
                    .collect();
                (operators, helpers)
            }
        };
        (dedup_preserving(operators), dedup_preserving(helpers))
    }

    /// Create the todo for a waiting stage, unless one of the same type
    /// is already open on the flow. Notifies the operators.
    pub async fn create(
        &self,
        ticket: &Ticket,
        flow: &Flow,
        todo_type: TodoType,
        base_operators: &[String],
    ) -> Result<Option<Todo>, TodoError> {
        let existing = self.services.store.flow_todos(flow.id).await?;
        if existing
            .iter()
            .any(|t| t.todo_type == todo_type && !t.status.is_done())
        {
            return Ok(None);
        }

        let (table_operators, table_helpers) = self.resolve_actors(ticket, todo_type).await;
        let operators = dedup_preserving(
            base_operators
                .iter()
                .cloned()
                .chain(table_operators),
        );
        let helpers: Vec<String> = dedup_preserving(table_helpers)
            .into_iter()
            .filter(|h| !operators.contains(h))
            .collect();

        let name = match todo_type {
            TodoType::Itsm => "external approval pending",
            TodoType::Approve => "manual confirmation pending",
            TodoType::InnerApprove => "in-flow approval pending",
            TodoType::ResourceReplenish => "resource replenishment needed",
            TodoType::InnerFailed => "task failed, retry or terminate",
        };
        let context = serde_json::json!({
            "ticket_id": ticket.id,
            "flow_id": flow.id,
        });

        let todo = Todo::new(
            ticket.id,
            flow.id,
            todo_type,
            name,
            operators,
            helpers,
            context,
        );
        self.services.store.insert_todo(todo.clone()).await?;
        info!(
            todo_id = %todo.id,
            ticket_id = %ticket.id,
            todo_type = ?todo_type,
            operators = ?todo.operators,
            "todo created"
        );

        let notifier = self.services.notifier.clone();
        let notified = todo.clone();
        tokio::spawn(async move {
            if let Err(err) = notifier.notify_todo(&notified).await {
                warn!(todo_id = %notified.id, error = %err, "todo notification failed");
            }
        });

        Ok(Some(todo))
    }

    /// Resolve a todo on behalf of `actor` and apply the flow side
    /// effects of the decision. Idempotent for already-done todos.
    pub async fn complete(
        &self,
        todo_id: Uuid,
        actor: &str,
        action: TodoAction,
    ) -> Result<Todo, TodoError> {
        let mut todo = self.services.store.todo(todo_id).await?;
        if todo.status.is_done() {
            return Ok(todo);
        }
        if !todo.operators.iter().any(|o| o == actor) {
            return Err(TodoError::NotAllowed {
                actor: actor.to_string(),
                todo_id,
            });
        }

        todo.status = match action {
            TodoAction::Approve => TodoStatus::DoneSuccess,
            TodoAction::Terminate => TodoStatus::DoneFailed,
        };
        todo.done_by = Some(actor.to_string());
        todo.done_at = Some(chrono::Utc::now());
        self.services.store.update_todo(todo.clone()).await?;
        self.services
            .store
            .append_todo_history(TodoHistory::new(todo.id, actor, action))
            .await?;
        info!(todo_id = %todo.id, actor, action = ?action, "todo resolved");

        self.apply_flow_effects(&todo, actor, action).await?;

        // The resolution may have unblocked the ticket
        let ticket_id = todo.ticket_id;
        let flow_manager = manager::TicketFlowManager::new(self.services.clone());
        flow_manager
            .update_ticket_status(ticket_id)
            .await
            .map_err(|e| TodoError::Advance(e.to_string()))?;
        flow_manager
            .run_next_flow(ticket_id)
            .await
            .map_err(|e| TodoError::Advance(e.to_string()))?;

        Ok(todo)
    }

    async fn apply_flow_effects(
        &self,
        todo: &Todo,
        actor: &str,
        action: TodoAction,
    ) -> Result<(), TodoError> {
        let ticket = self.services.store.ticket(todo.ticket_id).await?;
        let flow = self.services.store.flow(todo.flow_id).await?;

        match (todo.todo_type, action) {
            (TodoType::Approve, TodoAction::Approve) => {
                self.transition(&ticket, &flow, FlowStatus::Succeeded).await
            }
            (TodoType::Approve, TodoAction::Terminate) => {
                self.transition(&ticket, &flow, FlowStatus::Terminated).await
            }
            (TodoType::InnerFailed, TodoAction::Approve) => self.retry_inner(&ticket, flow).await,
            (TodoType::InnerFailed, TodoAction::Terminate) => {
                self.transition(&ticket, &flow, FlowStatus::Terminated).await
            }
            (TodoType::ResourceReplenish, TodoAction::Approve) => {
                self.retry_allocation(&ticket, &flow).await
            }
            (TodoType::ResourceReplenish, TodoAction::Terminate) => {
                self.transition(&ticket, &flow, FlowStatus::Terminated).await
            }
            (TodoType::Itsm, TodoAction::Terminate) => {
                // Withdraw outward, then close the flow
                let stage = TicketStage::for_flow(flow.flow_type, &self.services);
                stage
                    .revoke(&ticket, &flow, actor)
                    .await
                    .map_err(|e| TodoError::RetryFailed(e.to_string()))?;
                self.transition(&ticket, &flow, FlowStatus::Terminated).await
            }
            // The external system settles these on its own
            (TodoType::Itsm, TodoAction::Approve) => Ok(()),
            (TodoType::InnerApprove, _) => Ok(()),
        }
    }

    async fn transition(
        &self,
        ticket: &Ticket,
        flow: &Flow,
        target: FlowStatus,
    ) -> Result<(), TodoError> {
        manager::transition_flow(&self.services, ticket, flow, target, None)
            .await
            .map_err(|e| TodoError::Advance(e.to_string()))
    }

    /// Retry a failed task graph: reopen the flow, then kick off again.
    async fn retry_inner(&self, ticket: &Ticket, flow: Flow) -> Result<(), TodoError> {
        debug_assert!(flow.flow_type.is_inner());
        self.transition(ticket, &flow, FlowStatus::Running).await?;
        let reopened = self.services.store.flow(flow.id).await?;

        let stage = TicketStage::for_flow(reopened.flow_type, &self.services);
        match stage.run(ticket, &reopened).await {
            Ok(Some(correlation)) => {
                self.services
                    .store
                    .set_flow_correlation(reopened.id, correlation)
                    .await?;
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(err) => {
                // Kickoff refused: drop the flow back to failed
                let msg = err.to_string();
                self.transition(ticket, &reopened, FlowStatus::Failed)
                    .await?;
                Err(TodoError::RetryFailed(msg))
            }
        }
    }

    /// Re-run allocation for a flow waiting on replenishment.
    async fn retry_allocation(&self, ticket: &Ticket, flow: &Flow) -> Result<(), TodoError> {
        let stage = TicketStage::for_flow(flow.flow_type, &self.services);
        stage
            .run(ticket, flow)
            .await
            .map_err(|e: StageError| TodoError::RetryFailed(e.to_string()))?;
        Ok(())
    }

    /// Close every open todo on a flow with one outcome.
    pub async fn finish_flow_todos(
        &self,
        flow_id: Uuid,
        success: bool,
        actor: &str,
        message: &str,
    ) -> Result<(), TodoError> {
        let todos = self.services.store.flow_todos(flow_id).await?;
        for mut todo in todos.into_iter().filter(|t| !t.status.is_done()) {
            todo.status = if success {
                TodoStatus::DoneSuccess
            } else {
                TodoStatus::DoneFailed
            };
            todo.done_by = Some(actor.to_string());
            todo.done_at = Some(chrono::Utc::now());
            self.services.store.update_todo(todo.clone()).await?;
            let action = if success {
                TodoAction::Approve
            } else {
                TodoAction::Terminate
            };
            self.services
                .store
                .append_todo_history(TodoHistory::new(todo.id, actor, action))
                .await?;
            info!(todo_id = %todo.id, actor, success, message, "todo settled by stage");
        }
        Ok(())
    }

    /// Close every open todo on a ticket as failed (revocation path).
    pub async fn finish_ticket_todos(&self, ticket_id: Uuid, actor: &str) -> Result<(), TodoError> {
        let todos = self.services.store.ticket_todos(ticket_id).await?;
        for todo in todos.into_iter().filter(|t| !t.status.is_done()) {
            self.finish_flow_todos(todo.flow_id, false, actor, "ticket revoked")
                .await?;
        }
        Ok(())
    }

    /// The actionable surface for one user: open todos where their
    /// handle appears as operator or helper.
    pub async fn pending_for_user(&self, user: &str) -> Result<Vec<Todo>, TodoError> {
        let todos = self.services.store.pending_todos().await?;
        Ok(todos
            .into_iter()
            .filter(|t| {
                t.operators.iter().any(|o| o == user) || t.helpers.iter().any(|h| h == user)
            })
            .collect())
    }
}
