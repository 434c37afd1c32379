//! External approval (ITSM) stage.
//!
//! `run` creates the mirror todo and the external approval ticket;
//! `status` maps the external outcome onto the flow status and settles
//! the todo with the operator recorded in the approval log.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::external::{ApprovalService, ApprovalState};
use crate::models::{Flow, FlowStatus, Ticket, TodoType};
use crate::store::TicketStore;
use crate::services::Services;
use crate::stages::{FlowStage, StageError, StatusProbe};
use crate::todos::TodoManager;

pub struct ItsmStage {
    services: Services,
}

impl ItsmStage {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    /// Operator and message for the settled approval, from the external
    /// log. The upstream approval flow has a fixed three-node shape, so
    /// the third entry is the decision node; shorter logs fall back to
    /// the last entry rather than indexing out of range.
    async fn decision_entry(
        &self,
        probe: &mut StatusProbe,
        serial: &str,
    ) -> (String, String) {
        match probe.approval_logs(&*self.services.approval, serial).await {
            Ok(logs) => logs
                .get(2)
                .or_else(|| logs.last())
                .map(|entry| (entry.operator.clone(), entry.message.clone()))
                .unwrap_or_else(|| ("system".to_string(), String::new())),
            Err(err) => {
                warn!(serial, error = %err, "approval log unavailable, settling without actor");
                ("system".to_string(), String::new())
            }
        }
    }

    async fn settle_todo(
        &self,
        flow: &Flow,
        probe: &mut StatusProbe,
        serial: &str,
        success: bool,
    ) -> Result<(), StageError> {
        let (operator, message) = self.decision_entry(probe, serial).await;
        TodoManager::new(self.services.clone())
            .finish_flow_todos(flow.id, success, &operator, &message)
            .await?;
        Ok(())
    }

    /// Keep the external ticket URL on the flow for presentation.
    async fn remember_url(&self, flow: &Flow, url: &str) -> Result<(), StageError> {
        if url.is_empty() || flow.details.get("approval_url").is_some() {
            return Ok(());
        }
        let mut details = flow.details.clone();
        if let Some(map) = details.as_object_mut() {
            map.insert(
                "approval_url".to_string(),
                serde_json::Value::String(url.to_string()),
            );
            self.services.store.set_flow_details(flow.id, details).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl FlowStage for ItsmStage {
    async fn run(&self, ticket: &Ticket, flow: &Flow) -> Result<Option<String>, StageError> {
        TodoManager::new(self.services.clone())
            .create(ticket, flow, TodoType::Itsm, &[])
            .await?;

        let serial = self.services.approval.create_ticket(&flow.details).await?;
        debug!(ticket_id = %ticket.id, serial, "approval ticket created");
        Ok(Some(serial))
    }

    async fn status(
        &self,
        _ticket: &Ticket,
        flow: &Flow,
        probe: &mut StatusProbe,
    ) -> Result<FlowStatus, StageError> {
        let Some(serial) = flow.correlation_id.as_deref() else {
            return Ok(flow.status);
        };

        let snapshot = probe.approval(&*self.services.approval, serial).await?;
        self.remember_url(flow, &snapshot.ticket_url).await?;

        let status = match snapshot.state {
            ApprovalState::Running => FlowStatus::Running,
            ApprovalState::Revoked => {
                self.settle_todo(flow, probe, serial, false).await?;
                FlowStatus::Terminated
            }
            ApprovalState::Finished if snapshot.approved => {
                self.settle_todo(flow, probe, serial, true).await?;
                FlowStatus::Succeeded
            }
            ApprovalState::Finished => {
                self.settle_todo(flow, probe, serial, false).await?;
                FlowStatus::Terminated
            }
            ApprovalState::Terminated => {
                self.settle_todo(flow, probe, serial, false).await?;
                FlowStatus::Terminated
            }
        };
        Ok(status)
    }

    async fn revoke(&self, _ticket: &Ticket, flow: &Flow, operator: &str) -> Result<(), StageError> {
        if let Some(serial) = flow.correlation_id.as_deref() {
            self.services.approval.withdraw(serial, operator).await?;
        }
        TodoManager::new(self.services.clone())
            .finish_flow_todos(flow.id, false, operator, "revoked")
            .await?;
        Ok(())
    }

    fn summary(&self, flow: &Flow) -> String {
        match flow.correlation_id.as_deref() {
            Some(serial) => format!("external approval {serial}"),
            None => "external approval".to_string(),
        }
    }

    fn url(&self, flow: &Flow) -> Option<String> {
        flow.details
            .get("approval_url")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }
}
