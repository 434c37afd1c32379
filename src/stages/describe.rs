//! Informational stage: records what the ticket did, succeeds at once.

use async_trait::async_trait;

use crate::models::{Flow, FlowStatus, Ticket};
use crate::stages::{FlowStage, StageError, StatusProbe};

pub struct DescribeStage;

impl DescribeStage {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DescribeStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FlowStage for DescribeStage {
    async fn run(&self, _ticket: &Ticket, _flow: &Flow) -> Result<Option<String>, StageError> {
        Ok(None)
    }

    async fn status(
        &self,
        _ticket: &Ticket,
        _flow: &Flow,
        _probe: &mut StatusProbe,
    ) -> Result<FlowStatus, StageError> {
        Ok(FlowStatus::Succeeded)
    }

    async fn revoke(&self, _ticket: &Ticket, _flow: &Flow, _operator: &str) -> Result<(), StageError> {
        Ok(())
    }

    fn summary(&self, flow: &Flow) -> String {
        flow.details
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("task description")
            .to_string()
    }
}
