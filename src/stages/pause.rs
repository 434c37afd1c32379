//! Manual pause stage: the flow waits on a confirmation todo.

use async_trait::async_trait;

use crate::models::{Flow, FlowStatus, Ticket, TodoType};
use crate::services::Services;
use crate::stages::{FlowStage, StageError, StatusProbe};
use crate::todos::TodoManager;

pub struct PauseStage {
    services: Services,
}

impl PauseStage {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl FlowStage for PauseStage {
    async fn run(&self, ticket: &Ticket, flow: &Flow) -> Result<Option<String>, StageError> {
        TodoManager::new(self.services.clone())
            .create(ticket, flow, TodoType::Approve, &[])
            .await?;
        Ok(None)
    }

    async fn status(
        &self,
        _ticket: &Ticket,
        flow: &Flow,
        _probe: &mut StatusProbe,
    ) -> Result<FlowStatus, StageError> {
        // Advanced by todo completion, so the stored status is the truth
        Ok(flow.status)
    }

    async fn revoke(&self, _ticket: &Ticket, flow: &Flow, operator: &str) -> Result<(), StageError> {
        TodoManager::new(self.services.clone())
            .finish_flow_todos(flow.id, false, operator, "revoked")
            .await?;
        Ok(())
    }

    fn summary(&self, _flow: &Flow) -> String {
        "paused for manual confirmation".to_string()
    }
}
