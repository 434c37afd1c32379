//! Ticket type → stage sequence expansion.
//!
//! A static table maps each ticket type to its ordered flow descriptors
//! plus a pure detail-shaping function. Wiring is compile-time: adding
//! a ticket type means adding a match arm, not registering a class.

use serde_json::json;

use crate::models::{Flow, FlowType, Ticket, TicketType};
use crate::store::{StoreError, TicketStore};

/// Ordered flow sequence for a ticket type.
pub fn flow_sequence(ticket_type: TicketType) -> &'static [FlowType] {
    match ticket_type {
        TicketType::ClusterApply => &[
            FlowType::ExternalApproval,
            FlowType::ResourceApply,
            FlowType::InnerFlow,
            FlowType::ResourceDeliver,
        ],
        TicketType::ClusterScaleOut => &[
            FlowType::ExternalApproval,
            FlowType::ResourceBatchApply,
            FlowType::InnerFlow,
            FlowType::ResourceBatchDeliver,
        ],
        TicketType::ClusterDestroy => &[
            FlowType::ExternalApproval,
            FlowType::Pause,
            FlowType::InnerFlow,
        ],
        TicketType::ClusterSwitch => &[
            FlowType::ExternalApproval,
            FlowType::Timer,
            FlowType::QuickInnerFlow,
        ],
        TicketType::HostRecycle => &[
            FlowType::IgnoreResultInnerFlow,
            FlowType::DescribeTask,
        ],
    }
}

/// Shape one flow's starting details from the ticket's request details.
/// Pure: same ticket in, same details out.
pub fn flow_details(ticket: &Ticket, flow_type: FlowType) -> serde_json::Value {
    match flow_type {
        FlowType::ExternalApproval => json!({
            "title": format!("{:?} for biz {}", ticket.ticket_type, ticket.biz_id),
            "creator": ticket.creator,
            "biz_id": ticket.biz_id,
            "summary": ticket.remark,
        }),
        FlowType::ResourceApply => json!({
            "resource_spec": ticket.details.get("resource_spec")
                .cloned()
                .unwrap_or_else(|| json!({ "group": ticket.group, "count": 1 })),
        }),
        FlowType::ResourceBatchApply => json!({
            "resource_specs": ticket.details.get("resource_specs")
                .cloned()
                .unwrap_or_else(|| json!([{ "group": ticket.group, "count": 1 }])),
        }),
        FlowType::InnerFlow | FlowType::QuickInnerFlow | FlowType::IgnoreResultInnerFlow => json!({
            "ticket_type": ticket.ticket_type,
            "biz_id": ticket.biz_id,
            "params": ticket.details,
        }),
        FlowType::Timer => json!({
            "trigger_at": ticket.details.get("trigger_at").cloned()
                .unwrap_or(serde_json::Value::Null),
        }),
        FlowType::Pause => json!({}),
        FlowType::ResourceDeliver | FlowType::ResourceBatchDeliver => json!({}),
        FlowType::DescribeTask => json!({
            "description": format!("{:?} finished for biz {}", ticket.ticket_type, ticket.biz_id),
        }),
    }
}

/// Ticket creation request, as the (out-of-scope) API layer hands it in.
#[derive(Debug, Clone)]
pub struct TicketRequest {
    pub biz_id: u64,
    pub ticket_type: TicketType,
    pub creator: String,
    pub group: String,
    pub remark: String,
    pub details: serde_json::Value,
}

/// Expand a request into a ticket with its flow records, in bulk.
pub async fn create_ticket(
    store: &dyn TicketStore,
    request: TicketRequest,
) -> Result<Ticket, StoreError> {
    let mut ticket = Ticket::new(
        request.biz_id,
        request.ticket_type,
        request.creator,
        request.group,
        request.details,
    );
    ticket.remark = request.remark;

    let flows: Vec<Flow> = flow_sequence(ticket.ticket_type)
        .iter()
        .enumerate()
        .map(|(ordinal, flow_type)| {
            Flow::new(
                ticket.id,
                *flow_type,
                ordinal as u32,
                flow_details(&ticket, *flow_type),
            )
        })
        .collect();

    store.insert_ticket(ticket.clone()).await?;
    store.insert_flows(flows).await?;
    Ok(ticket)
}
