//! Internal task-graph execution stage.

use async_trait::async_trait;
use tracing::debug;

use crate::external::{TaskGraphEngine, TaskGraphState};
use crate::models::{Flow, FlowStatus, Ticket};
use crate::services::Services;
use crate::stages::{FlowStage, StageError, StatusProbe};

/// Behavior variants of the task-graph stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InnerMode {
    /// Full tracking: failure pauses the ticket on a retry todo
    Standard,
    /// Fast path: failure fails the ticket without a retry todo
    Quick,
    /// Kickoff only: outcome is deliberately not consulted
    IgnoreResult,
}

pub struct InnerFlowStage {
    services: Services,
    mode: InnerMode,
}

impl InnerFlowStage {
    pub fn new(services: Services, mode: InnerMode) -> Self {
        Self { services, mode }
    }

    pub fn mode(&self) -> InnerMode {
        self.mode
    }
}

#[async_trait]
impl FlowStage for InnerFlowStage {
    async fn run(&self, ticket: &Ticket, flow: &Flow) -> Result<Option<String>, StageError> {
        let root_id = self.services.taskgraph.start(&flow.details).await?;
        debug!(ticket_id = %ticket.id, root_id, "task graph started");
        Ok(Some(root_id))
    }

    async fn status(
        &self,
        _ticket: &Ticket,
        flow: &Flow,
        probe: &mut StatusProbe,
    ) -> Result<FlowStatus, StageError> {
        let Some(root_id) = flow.correlation_id.as_deref() else {
            return Ok(flow.status);
        };

        if self.mode == InnerMode::IgnoreResult {
            // Kicked off is all this variant promises
            return Ok(FlowStatus::Succeeded);
        }

        let state = probe
            .graph_state(&*self.services.taskgraph, root_id)
            .await?;
        let status = match state {
            TaskGraphState::Finished => FlowStatus::Succeeded,
            TaskGraphState::Revoked => FlowStatus::Terminated,
            state if state.is_failed() => FlowStatus::Failed,
            _ => FlowStatus::Running,
        };
        Ok(status)
    }

    async fn revoke(&self, _ticket: &Ticket, flow: &Flow, _operator: &str) -> Result<(), StageError> {
        if let Some(root_id) = flow.correlation_id.as_deref() {
            self.services.taskgraph.revoke(root_id).await?;
        }
        Ok(())
    }

    fn summary(&self, flow: &Flow) -> String {
        let label = match self.mode {
            InnerMode::Standard => "task graph",
            InnerMode::Quick => "task graph (quick)",
            InnerMode::IgnoreResult => "task graph (result ignored)",
        };
        match flow.correlation_id.as_deref() {
            Some(root_id) => format!("{label} {root_id}"),
            None => label.to_string(),
        }
    }
}
