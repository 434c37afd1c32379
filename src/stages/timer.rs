//! Timer stage: succeed once the stored trigger time has passed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Flow, FlowStatus, Ticket};
use crate::stages::{FlowStage, StageError, StatusProbe};

pub struct TimerStage;

impl TimerStage {
    pub fn new() -> Self {
        Self
    }

    fn trigger_at(flow: &Flow) -> Result<DateTime<Utc>, StageError> {
        let raw = flow
            .details
            .get("trigger_at")
            .and_then(|v| v.as_str())
            .ok_or_else(|| StageError::InvalidDetails("timer flow without trigger_at".into()))?;
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| StageError::InvalidDetails(format!("bad trigger_at {raw}: {e}")))
    }
}

impl Default for TimerStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FlowStage for TimerStage {
    async fn run(&self, _ticket: &Ticket, flow: &Flow) -> Result<Option<String>, StageError> {
        // Validate up front so a malformed trigger is a setup failure,
        // not a poll-time surprise
        Self::trigger_at(flow)?;
        Ok(None)
    }

    async fn status(
        &self,
        _ticket: &Ticket,
        flow: &Flow,
        _probe: &mut StatusProbe,
    ) -> Result<FlowStatus, StageError> {
        let trigger_at = Self::trigger_at(flow)?;
        if Utc::now() >= trigger_at {
            Ok(FlowStatus::Succeeded)
        } else {
            Ok(FlowStatus::Running)
        }
    }

    async fn revoke(&self, _ticket: &Ticket, _flow: &Flow, _operator: &str) -> Result<(), StageError> {
        Ok(())
    }

    fn summary(&self, flow: &Flow) -> String {
        match Self::trigger_at(flow) {
            Ok(trigger_at) => format!("waiting until {trigger_at}"),
            Err(_) => "waiting on timer".to_string(),
        }
    }
}
