//! Flow stage contract and the concrete stage implementations.
//!
//! Every flow type maps to one stage variant with a uniform lifecycle:
//! `run` starts the work and returns the external correlation id,
//! `status` derives the live status from external state, `revoke`
//! cancels outward. Dispatch is a sum type selected from the flow's
//! stored type tag — static configuration, not inheritance.

pub mod describe;
pub mod inner;
pub mod itsm;
pub mod pause;
pub mod resource;
pub mod timer;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::external::{
    ApprovalLogEntry, ApprovalService, ApprovalSnapshot, ExternalError, TaskGraphEngine,
    TaskGraphState,
};
use crate::models::{Flow, FlowStatus, FlowType, Ticket};
use crate::services::Services;
use crate::store::StoreError;

pub use describe::DescribeStage;
pub use inner::{InnerFlowStage, InnerMode};
pub use itsm::ItsmStage;
pub use pause::PauseStage;
pub use resource::{ResourceApplyStage, ResourceDeliverStage};
pub use timer::TimerStage;

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    External(#[from] ExternalError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("todo bookkeeping failed: {0}")]
    Todo(#[from] crate::todos::TodoError),
    #[error("flow {0} has no external correlation id yet")]
    MissingCorrelation(Uuid),
    #[error("invalid stage details: {0}")]
    InvalidDetails(String),
}

impl StageError {
    /// Transient errors are swallowed by status polling; everything else
    /// is a real stage problem.
    pub fn is_transient(&self) -> bool {
        matches!(self, StageError::External(e) if e.is_transient())
    }
}

/// Memo for one status-evaluation pass.
///
/// External query results are cached per correlation id so evaluating a
/// ticket never asks the same question twice within one pass. Scoped
/// explicitly: the manager creates one per `update_ticket_status` call
/// and drops it afterwards.
#[derive(Default)]
pub struct StatusProbe {
    approvals: HashMap<String, ApprovalSnapshot>,
    approval_logs: HashMap<String, Vec<ApprovalLogEntry>>,
    graph_states: HashMap<String, TaskGraphState>,
}

impl StatusProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn approval(
        &mut self,
        service: &dyn ApprovalService,
        serial: &str,
    ) -> Result<ApprovalSnapshot, ExternalError> {
        if let Some(snapshot) = self.approvals.get(serial) {
            return Ok(snapshot.clone());
        }
        let snapshot = service.approval_result(serial).await?;
        self.approvals.insert(serial.to_string(), snapshot.clone());
        Ok(snapshot)
    }

    pub async fn approval_logs(
        &mut self,
        service: &dyn ApprovalService,
        serial: &str,
    ) -> Result<Vec<ApprovalLogEntry>, ExternalError> {
        if let Some(logs) = self.approval_logs.get(serial) {
            return Ok(logs.clone());
        }
        let logs = service.ticket_logs(serial).await?;
        self.approval_logs.insert(serial.to_string(), logs.clone());
        Ok(logs)
    }

    pub async fn graph_state(
        &mut self,
        engine: &dyn TaskGraphEngine,
        root_id: &str,
    ) -> Result<TaskGraphState, ExternalError> {
        if let Some(state) = self.graph_states.get(root_id) {
            return Ok(*state);
        }
        let state = engine.state(root_id).await?;
        self.graph_states.insert(root_id.to_string(), state);
        Ok(state)
    }
}

/// Uniform lifecycle every stage kind implements.
#[async_trait]
pub trait FlowStage: Send + Sync {
    /// Start the stage's work. Returns the external correlation id when
    /// the stage is tracked by an external system. Errors here are
    /// setup failures: the flow never reaches Running.
    async fn run(&self, ticket: &Ticket, flow: &Flow) -> Result<Option<String>, StageError>;

    /// Live status, derived from external state where one exists.
    async fn status(
        &self,
        ticket: &Ticket,
        flow: &Flow,
        probe: &mut StatusProbe,
    ) -> Result<FlowStatus, StageError>;

    /// Cancel outward. Must be idempotent.
    async fn revoke(&self, ticket: &Ticket, flow: &Flow, operator: &str) -> Result<(), StageError>;

    /// Short human-readable description of what the stage is doing.
    fn summary(&self, flow: &Flow) -> String;

    /// Link to the external system tracking this stage, when one exists.
    fn url(&self, flow: &Flow) -> Option<String> {
        let _ = flow;
        None
    }
}

/// Sum type over the concrete stage kinds; the registry is the
/// `for_flow` match below.
pub enum TicketStage {
    Approval(ItsmStage),
    Inner(InnerFlowStage),
    Pause(PauseStage),
    Timer(TimerStage),
    ResourceApply(ResourceApplyStage),
    ResourceDeliver(ResourceDeliverStage),
    Describe(DescribeStage),
}

impl TicketStage {
    /// Select the stage behavior for a flow's stored type tag.
    pub fn for_flow(flow_type: FlowType, services: &Services) -> Self {
        match flow_type {
            FlowType::ExternalApproval => Self::Approval(ItsmStage::new(services.clone())),
            FlowType::InnerFlow => {
                Self::Inner(InnerFlowStage::new(services.clone(), InnerMode::Standard))
            }
            FlowType::QuickInnerFlow => {
                Self::Inner(InnerFlowStage::new(services.clone(), InnerMode::Quick))
            }
            FlowType::IgnoreResultInnerFlow => {
                Self::Inner(InnerFlowStage::new(services.clone(), InnerMode::IgnoreResult))
            }
            FlowType::Pause => Self::Pause(PauseStage::new(services.clone())),
            FlowType::Timer => Self::Timer(TimerStage::new()),
            FlowType::ResourceApply => {
                Self::ResourceApply(ResourceApplyStage::new(services.clone(), false))
            }
            FlowType::ResourceBatchApply => {
                Self::ResourceApply(ResourceApplyStage::new(services.clone(), true))
            }
            FlowType::ResourceDeliver => {
                Self::ResourceDeliver(ResourceDeliverStage::new(services.clone(), false))
            }
            FlowType::ResourceBatchDeliver => {
                Self::ResourceDeliver(ResourceDeliverStage::new(services.clone(), true))
            }
            FlowType::DescribeTask => Self::Describe(DescribeStage::new()),
        }
    }
}

#[async_trait]
impl FlowStage for TicketStage {
    async fn run(&self, ticket: &Ticket, flow: &Flow) -> Result<Option<String>, StageError> {
        match self {
            Self::Approval(s) => s.run(ticket, flow).await,
            Self::Inner(s) => s.run(ticket, flow).await,
            Self::Pause(s) => s.run(ticket, flow).await,
            Self::Timer(s) => s.run(ticket, flow).await,
            Self::ResourceApply(s) => s.run(ticket, flow).await,
            Self::ResourceDeliver(s) => s.run(ticket, flow).await,
            Self::Describe(s) => s.run(ticket, flow).await,
        }
    }

    async fn status(
        &self,
        ticket: &Ticket,
        flow: &Flow,
        probe: &mut StatusProbe,
    ) -> Result<FlowStatus, StageError> {
        match self {
            Self::Approval(s) => s.status(ticket, flow, probe).await,
            Self::Inner(s) => s.status(ticket, flow, probe).await,
            Self::Pause(s) => s.status(ticket, flow, probe).await,
            Self::Timer(s) => s.status(ticket, flow, probe).await,
            Self::ResourceApply(s) => s.status(ticket, flow, probe).await,
            Self::ResourceDeliver(s) => s.status(ticket, flow, probe).await,
            Self::Describe(s) => s.status(ticket, flow, probe).await,
        }
    }

    async fn revoke(&self, ticket: &Ticket, flow: &Flow, operator: &str) -> Result<(), StageError> {
        match self {
            Self::Approval(s) => s.revoke(ticket, flow, operator).await,
            Self::Inner(s) => s.revoke(ticket, flow, operator).await,
            Self::Pause(s) => s.revoke(ticket, flow, operator).await,
            Self::Timer(s) => s.revoke(ticket, flow, operator).await,
            Self::ResourceApply(s) => s.revoke(ticket, flow, operator).await,
            Self::ResourceDeliver(s) => s.revoke(ticket, flow, operator).await,
            Self::Describe(s) => s.revoke(ticket, flow, operator).await,
        }
    }

    fn summary(&self, flow: &Flow) -> String {
        match self {
            Self::Approval(s) => s.summary(flow),
            Self::Inner(s) => s.summary(flow),
            Self::Pause(s) => s.summary(flow),
            Self::Timer(s) => s.summary(flow),
            Self::ResourceApply(s) => s.summary(flow),
            Self::ResourceDeliver(s) => s.summary(flow),
            Self::Describe(s) => s.summary(flow),
        }
    }

    fn url(&self, flow: &Flow) -> Option<String> {
        match self {
            Self::Approval(s) => s.url(flow),
            Self::Inner(s) => s.url(flow),
            Self::Pause(s) => s.url(flow),
            Self::Timer(s) => s.url(flow),
            Self::ResourceApply(s) => s.url(flow),
            Self::ResourceDeliver(s) => s.url(flow),
            Self::Describe(s) => s.url(flow),
        }
    }
}
