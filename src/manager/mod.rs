//! Ticket flow manager: sequences a ticket's flows, keeps the ticket
//! status consistent with them, and fires transition side effects.

use thiserror::Error;
use tokio::spawn;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::external::{Notifier, ResourcePool};
use crate::models::{
    Flow, FlowStatus, FlowType, MachineEvent, MachineEventType, Ticket, TicketStatus, TodoType,
};
use crate::pool::{MachinePoolManager, PoolError};
use crate::services::Services;
use crate::stages::resource::ResourceApplyStage;
use crate::stages::{FlowStage, StageError, StatusProbe, TicketStage};
use crate::store::{StoreError, TicketStore};
use crate::todos::{TodoError, TodoManager};

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Todo(#[from] TodoError),
}

/// Per-flow-type ticket status while that flow runs. Most flow kinds
/// are plain Running; the waiting kinds surface their own flavor.
pub fn running_ticket_status(flow_type: FlowType) -> TicketStatus {
    match flow_type {
        FlowType::ExternalApproval => TicketStatus::Approving,
        FlowType::Pause => TicketStatus::AwaitingConfirm,
        FlowType::Timer => TicketStatus::Scheduled,
        FlowType::ResourceApply | FlowType::ResourceBatchApply => TicketStatus::ResourceReplenish,
        _ => TicketStatus::Running,
    }
}

/// Resolve the status set of a ticket's flows to one ticket status.
/// `None` means "no update": mixed ready/finished with nothing running
/// is a between-states snapshot, and writing it would flap.
pub fn aggregate_status(statuses: &[(FlowType, FlowStatus)]) -> Option<TicketStatus> {
    if statuses.is_empty() {
        return None;
    }
    if statuses.iter().any(|(_, s)| *s == FlowStatus::Terminated) {
        return Some(TicketStatus::Terminated);
    }
    if statuses.iter().any(|(_, s)| *s == FlowStatus::Failed) {
        return Some(TicketStatus::Failed);
    }
    if statuses.iter().any(|(_, s)| *s == FlowStatus::Revoked) {
        return Some(TicketStatus::Revoked);
    }
    if let Some((flow_type, _)) = statuses.iter().find(|(_, s)| *s == FlowStatus::Running) {
        return Some(running_ticket_status(*flow_type));
    }
    if statuses.iter().all(|(_, s)| s.is_finished()) {
        return Some(TicketStatus::Succeeded);
    }
    None
}

/// Persist a flow status change and fire its side-effect hooks.
///
/// Both the manager and the todo subsystem route flow transitions
/// through here so the dirty-pool hook and the inner-failed todo fire
/// no matter who moved the flow.
pub(crate) async fn transition_flow(
    services: &Services,
    ticket: &Ticket,
    flow: &Flow,
    target: FlowStatus,
    error_message: Option<String>,
) -> Result<(), ManagerError> {
    let origin = flow.status;
    if origin == target {
        return Ok(());
    }

    services
        .store
        .set_flow_status(flow.id, target, error_message)
        .await?;
    info!(
        ticket_id = %ticket.id,
        flow_id = %flow.id,
        flow_type = ?flow.flow_type,
        ?origin,
        ?target,
        "flow status transition"
    );

    if flow.flow_type.is_inner() {
        MachinePoolManager::new(services.clone())
            .on_inner_flow_transition(ticket, flow, origin, target)
            .await?;

        // Standard inner flows pause on failure for a human decision;
        // the quick and ignore-result variants do not
        if flow.flow_type == FlowType::InnerFlow && target == FlowStatus::Failed {
            TodoManager::new(services.clone())
                .create(ticket, flow, TodoType::InnerFailed, &[])
                .await?;
        }
    }
    Ok(())
}

pub struct TicketFlowManager {
    services: Services,
}

impl TicketFlowManager {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Live status of one flow. Finished flows are read-only; ready
    /// flows have nothing to ask externally; running flows consult
    /// their stage, persisting any transition observed.
    ///
    /// Transient poll errors never regress an observed state: the last
    /// stored status is returned instead.
    pub async fn compute_flow_status(
        &self,
        ticket: &Ticket,
        flow: &Flow,
        probe: &mut StatusProbe,
    ) -> Result<FlowStatus, ManagerError> {
        if flow.status.is_finished() || flow.status == FlowStatus::Ready {
            return Ok(flow.status);
        }

        let stage = TicketStage::for_flow(flow.flow_type, &self.services);
        match stage.status(ticket, flow, probe).await {
            Ok(live) => {
                if live != flow.status {
                    transition_flow(&self.services, ticket, flow, live, None).await?;
                }
                Ok(live)
            }
            Err(err) if err.is_transient() => {
                warn!(
                    flow_id = %flow.id,
                    error = %err,
                    "transient poll failure, keeping last known status"
                );
                Ok(flow.status)
            }
            Err(err) => {
                error!(flow_id = %flow.id, error = %err, "status poll failed");
                Ok(flow.status)
            }
        }
    }

    /// Recompute the ticket status from its flows, under the per-ticket
    /// lock so concurrent completion events serialize. Finished tickets
    /// never change again.
    pub async fn update_ticket_status(&self, ticket_id: Uuid) -> Result<TicketStatus, ManagerError> {
        let guard = self.services.store.lock_ticket(ticket_id).await;

        let ticket = self.services.store.ticket(ticket_id).await?;
        let flows = self.services.store.ticket_flows(ticket_id).await?;

        // Monotonic over finished inputs: a settled ticket only moves
        // again when a retry has reopened one of its flows
        if ticket.status.is_finished() && flows.iter().all(|f| f.status.is_finished()) {
            return Ok(ticket.status);
        }

        let mut probe = StatusProbe::new();
        let mut statuses = Vec::with_capacity(flows.len());
        for flow in &flows {
            let status = self.compute_flow_status(&ticket, flow, &mut probe).await?;
            statuses.push((flow.flow_type, status));
        }

        let Some(new_status) = aggregate_status(&statuses) else {
            return Ok(ticket.status);
        };
        if new_status == ticket.status {
            return Ok(ticket.status);
        }

        self.services
            .store
            .set_ticket_status(ticket_id, new_status)
            .await?;
        drop(guard);

        self.ticket_status_trigger(&ticket, ticket.status, new_status)
            .await?;
        Ok(new_status)
    }

    /// Advance the ticket: start the first flow whose predecessors are
    /// all settled. Idempotent — calling it when nothing is ready is a
    /// no-op, which is what makes progress resumable after restarts.
    pub async fn run_next_flow(&self, ticket_id: Uuid) -> Result<Option<Uuid>, ManagerError> {
        let ticket = self.services.store.ticket(ticket_id).await?;
        if ticket.status.is_finished() {
            return Ok(None);
        }

        let flows = self.services.store.ticket_flows(ticket_id).await?;
        let mut probe = StatusProbe::new();
        let mut next: Option<Uuid> = None;
        for flow in &flows {
            let status = self.compute_flow_status(&ticket, flow, &mut probe).await?;
            if !status.is_finished() {
                // First unsettled flow: start it only if it has not
                // started yet, otherwise leave it to finish
                if status == FlowStatus::Ready {
                    next = Some(flow.id);
                }
                break;
            }
        }

        let Some(flow_id) = next else {
            self.update_ticket_status(ticket_id).await?;
            return Ok(None);
        };

        // Re-read: a predecessor may have wired details in during this pass
        let flow = self.services.store.flow(flow_id).await?;
        self.start_flow(&ticket, &flow).await?;
        self.update_ticket_status(ticket_id).await?;
        Ok(Some(flow_id))
    }

    async fn start_flow(&self, ticket: &Ticket, flow: &Flow) -> Result<(), ManagerError> {
        info!(
            ticket_id = %ticket.id,
            flow_id = %flow.id,
            flow_type = ?flow.flow_type,
            ordinal = flow.ordinal,
            "starting flow"
        );
        self.services.store.mark_flow_started(flow.id).await?;

        let stage = TicketStage::for_flow(flow.flow_type, &self.services);
        match stage.run(ticket, flow).await {
            Ok(correlation) => {
                if let Some(correlation) = correlation {
                    self.services
                        .store
                        .set_flow_correlation(flow.id, correlation)
                        .await?;
                }
                transition_flow(&self.services, ticket, flow, FlowStatus::Running, None).await
            }
            Err(err) => {
                error!(
                    ticket_id = %ticket.id,
                    flow_id = %flow.id,
                    error = %err,
                    "stage setup failed"
                );
                transition_flow(
                    &self.services,
                    ticket,
                    flow,
                    FlowStatus::Failed,
                    Some(err.to_string()),
                )
                .await
            }
        }
    }

    /// Revoke the ticket's active flow and reflect it on the ticket.
    /// Idempotent: a finished ticket is left alone.
    pub async fn revoke_ticket(&self, ticket_id: Uuid, operator: &str) -> Result<(), ManagerError> {
        let ticket = self.services.store.ticket(ticket_id).await?;
        if ticket.status.is_finished() {
            return Ok(());
        }

        let flows = self.services.store.ticket_flows(ticket_id).await?;
        for flow in &flows {
            if flow.status == FlowStatus::Running {
                let stage = TicketStage::for_flow(flow.flow_type, &self.services);
                stage.revoke(&ticket, flow, operator).await?;
                transition_flow(
                    &self.services,
                    &ticket,
                    flow,
                    FlowStatus::Terminated,
                    Some(format!("revoked by {operator}")),
                )
                .await?;
            }
        }

        TodoManager::new(self.services.clone())
            .finish_ticket_todos(ticket_id, operator)
            .await?;
        self.update_ticket_status(ticket_id).await?;
        info!(ticket_id = %ticket_id, operator, "ticket revoked");
        Ok(())
    }

    /// Side effects of an actual ticket status change.
    async fn ticket_status_trigger(
        &self,
        ticket: &Ticket,
        origin: TicketStatus,
        target: TicketStatus,
    ) -> Result<(), ManagerError> {
        info!(
            ticket_id = %ticket.id,
            ?origin,
            ?target,
            "ticket status changed"
        );

        if matches!(
            target,
            TicketStatus::Failed | TicketStatus::Terminated | TicketStatus::Revoked
        ) {
            self.release_undelivered_hosts(ticket).await?;
        }

        // Running and replenish landings notify at todo-creation time
        // instead, so the user is not pinged twice
        if !matches!(target, TicketStatus::Running | TicketStatus::ResourceReplenish) {
            let notifier = self.services.notifier.clone();
            let ticket_id = ticket.id;
            spawn(async move {
                if let Err(err) = notifier.notify_status(ticket_id, target).await {
                    warn!(ticket_id = %ticket_id, error = %err, "status notification failed");
                }
            });
        }
        Ok(())
    }

    /// A dead ticket gives back hosts that were allocated but never
    /// delivered to the business.
    async fn release_undelivered_hosts(&self, ticket: &Ticket) -> Result<(), ManagerError> {
        let flows = self.services.store.ticket_flows(ticket.id).await?;
        for flow in &flows {
            if !flow.flow_type.is_resource_apply() {
                continue;
            }
            let allocated = ResourceApplyStage::allocated_hosts(flow);
            if allocated.is_empty() {
                continue;
            }
            let delivered = flows.iter().any(|f| {
                f.flow_type.is_resource_deliver()
                    && f.ordinal > flow.ordinal
                    && f.details.get("delivered").is_some()
            });
            if delivered {
                continue;
            }

            // Quarantined hosts belong to the pool state machine now
            let mut returnable = Vec::new();
            for host in allocated {
                if self.services.store.pool_record(host.host_id).await?.is_none() {
                    returnable.push(host);
                }
            }
            let allocated = returnable;
            if allocated.is_empty() {
                continue;
            }

            self.services.resources.return_hosts(&allocated).await.map_err(StageError::from)?;
            for host in &allocated {
                self.services
                    .store
                    .append_machine_event(MachineEvent::new(
                        host.clone(),
                        MachineEventType::ReturnResource,
                        Some(ticket.id),
                        "system".to_string(),
                    ))
                    .await?;
            }
            info!(
                ticket_id = %ticket.id,
                count = allocated.len(),
                "returned undelivered hosts to the resource pool"
            );
        }
        Ok(())
    }
}
