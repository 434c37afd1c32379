//! Resource allocation and delivery stages.
//!
//! Apply allocates hosts from the procurement service, records the
//! apply events, and hands the hosts to the next flow via its details.
//! A capacity shortage does not fail the flow: it opens a replenish
//! todo and leaves the flow running until retried.

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use crate::external::{ExternalError, ResourcePool, ResourceRequest};
use crate::models::{Flow, FlowStatus, Host, MachineEvent, MachineEventType, Ticket, TodoType};
use crate::store::TicketStore;
use crate::services::Services;
use crate::stages::{FlowStage, StageError, StatusProbe};
use crate::todos::TodoManager;

/// Merge one key into a JSON object, creating the object if needed.
pub(crate) fn details_with(
    details: &serde_json::Value,
    key: &str,
    value: serde_json::Value,
) -> serde_json::Value {
    let mut merged = match details {
        serde_json::Value::Object(map) => serde_json::Value::Object(map.clone()),
        _ => json!({}),
    };
    if let Some(map) = merged.as_object_mut() {
        map.insert(key.to_string(), value);
    }
    merged
}

pub struct ResourceApplyStage {
    services: Services,
    batch: bool,
}

impl ResourceApplyStage {
    pub fn new(services: Services, batch: bool) -> Self {
        Self { services, batch }
    }

    fn requests(&self, ticket: &Ticket, flow: &Flow) -> Result<Vec<ResourceRequest>, StageError> {
        let parse = |value: &serde_json::Value| -> Result<ResourceRequest, StageError> {
            let group = value
                .get("group")
                .and_then(|v| v.as_str())
                .unwrap_or(&ticket.group)
                .to_string();
            let count = value
                .get("count")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| StageError::InvalidDetails("resource spec without count".into()))?;
            Ok(ResourceRequest {
                biz_id: ticket.biz_id,
                group,
                count: count as u32,
            })
        };

        if self.batch {
            let specs = flow
                .details
                .get("resource_specs")
                .and_then(|v| v.as_array())
                .ok_or_else(|| {
                    StageError::InvalidDetails("batch apply without resource_specs".into())
                })?;
            specs.iter().map(parse).collect()
        } else {
            let spec = flow.details.get("resource_spec").ok_or_else(|| {
                StageError::InvalidDetails("resource apply without resource_spec".into())
            })?;
            Ok(vec![parse(spec)?])
        }
    }

    pub(crate) fn allocated_hosts(flow: &Flow) -> Vec<Host> {
        flow.details
            .get("allocated")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    /// Allocate and wire the hosts through. Safe to call again after a
    /// shortage: an already-allocated flow is a no-op.
    pub async fn allocate(&self, ticket: &Ticket, flow: &Flow) -> Result<(), StageError> {
        if flow.details.get("allocated").is_some() {
            return Ok(());
        }

        let requests = self.requests(ticket, flow)?;
        let mut allocated: Vec<Host> = Vec::new();
        for request in &requests {
            match self.services.resources.apply(request).await {
                Ok(hosts) => allocated.extend(hosts),
                Err(ExternalError::CapacityShortage(reason)) => {
                    // Give back partial grabs so the pool stays whole
                    if !allocated.is_empty() {
                        self.services.resources.return_hosts(&allocated).await?;
                    }
                    warn!(ticket_id = %ticket.id, reason, "resource pool short, opening replenish todo");
                    TodoManager::new(self.services.clone())
                        .create(ticket, flow, TodoType::ResourceReplenish, &[])
                        .await?;
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            }
        }

        for host in &allocated {
            self.services
                .store
                .append_machine_event(MachineEvent::new(
                    host.clone(),
                    MachineEventType::ApplyResource,
                    Some(ticket.id),
                    ticket.creator.clone(),
                ))
                .await?;
        }

        self.services
            .store
            .set_flow_details(
                flow.id,
                details_with(&flow.details, "allocated", json!(allocated)),
            )
            .await?;

        // The next flow consumes the hosts through its details
        let flows = self.services.store.ticket_flows(ticket.id).await?;
        if let Some(next) = flows.iter().find(|f| f.ordinal == flow.ordinal + 1) {
            self.services
                .store
                .set_flow_details(next.id, details_with(&next.details, "hosts", json!(allocated)))
                .await?;
        }

        debug!(ticket_id = %ticket.id, hosts = allocated.len(), "resource allocation complete");
        Ok(())
    }
}

#[async_trait]
impl FlowStage for ResourceApplyStage {
    async fn run(&self, ticket: &Ticket, flow: &Flow) -> Result<Option<String>, StageError> {
        self.allocate(ticket, flow).await?;
        Ok(None)
    }

    async fn status(
        &self,
        _ticket: &Ticket,
        flow: &Flow,
        _probe: &mut StatusProbe,
    ) -> Result<FlowStatus, StageError> {
        if flow.details.get("allocated").is_some() {
            Ok(FlowStatus::Succeeded)
        } else {
            // Waiting on replenishment
            Ok(FlowStatus::Running)
        }
    }

    async fn revoke(&self, ticket: &Ticket, flow: &Flow, operator: &str) -> Result<(), StageError> {
        let allocated = Self::allocated_hosts(flow);
        if !allocated.is_empty() {
            self.services.resources.return_hosts(&allocated).await?;
            for host in &allocated {
                self.services
                    .store
                    .append_machine_event(MachineEvent::new(
                        host.clone(),
                        MachineEventType::ReturnResource,
                        Some(ticket.id),
                        operator.to_string(),
                    ))
                    .await?;
            }
        }
        TodoManager::new(self.services.clone())
            .finish_flow_todos(flow.id, false, operator, "revoked")
            .await?;
        Ok(())
    }

    fn summary(&self, flow: &Flow) -> String {
        let allocated = Self::allocated_hosts(flow);
        if allocated.is_empty() {
            "allocating hosts from the resource pool".to_string()
        } else {
            format!("allocated {} hosts", allocated.len())
        }
    }
}

/// Terminal bookkeeping for allocated hosts: marks them delivered to
/// the business. When a ticket dies before delivery, the manager sends
/// the hosts back instead.
pub struct ResourceDeliverStage {
    services: Services,
    batch: bool,
}

impl ResourceDeliverStage {
    pub fn new(services: Services, batch: bool) -> Self {
        Self { services, batch }
    }
}

#[async_trait]
impl FlowStage for ResourceDeliverStage {
    async fn run(&self, ticket: &Ticket, flow: &Flow) -> Result<Option<String>, StageError> {
        self.services
            .store
            .set_flow_details(flow.id, details_with(&flow.details, "delivered", json!(true)))
            .await?;
        debug!(ticket_id = %ticket.id, batch = self.batch, "resource delivery confirmed");
        Ok(None)
    }

    async fn status(
        &self,
        _ticket: &Ticket,
        flow: &Flow,
        _probe: &mut StatusProbe,
    ) -> Result<FlowStatus, StageError> {
        if flow.details.get("delivered").is_some() {
            Ok(FlowStatus::Succeeded)
        } else {
            Ok(FlowStatus::Running)
        }
    }

    async fn revoke(&self, _ticket: &Ticket, _flow: &Flow, _operator: &str) -> Result<(), StageError> {
        Ok(())
    }

    fn summary(&self, _flow: &Flow) -> String {
        if self.batch {
            "delivering host batches".to_string()
        } else {
            "delivering hosts".to_string()
        }
    }
}
