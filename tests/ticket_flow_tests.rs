//! Integration tests for the ticket flow manager: sequencing, status
//! aggregation, monotonicity, and transient-error behavior.

use proptest::prelude::*;

use fleetflow::builders::{create_ticket, TicketRequest};
use fleetflow::external::{ApprovalService, ApprovalState};
use fleetflow::manager::{aggregate_status, TicketFlowManager};
use fleetflow::models::{FlowStatus, FlowType, TicketStatus, TicketType};
use fleetflow::store::TicketStore;
use fleetflow::test_support::test_services;

fn destroy_request() -> TicketRequest {
    TicketRequest {
        biz_id: 1,
        ticket_type: TicketType::ClusterDestroy,
        creator: "alice".to_string(),
        group: "mysql".to_string(),
        remark: "tear down staging".to_string(),
        details: serde_json::json!({}),
    }
}

#[tokio::test]
async fn flows_start_strictly_in_order() {
    let (services, handles) = test_services();
    let manager = TicketFlowManager::new(services.clone());
    let ticket = create_ticket(&*services.store, destroy_request())
        .await
        .unwrap();

    // First advance starts the approval flow only
    manager.run_next_flow(ticket.id).await.unwrap();
    let flows = services.store.ticket_flows(ticket.id).await.unwrap();
    assert_eq!(flows[0].status, FlowStatus::Running);
    assert_eq!(flows[1].status, FlowStatus::Ready);
    assert!(flows[1].started_at.is_none());

    // Re-advancing while the approval is still pending is a no-op
    for _ in 0..3 {
        assert!(manager.run_next_flow(ticket.id).await.unwrap().is_none());
    }
    let flows = services.store.ticket_flows(ticket.id).await.unwrap();
    assert_eq!(flows[1].status, FlowStatus::Ready);

    // Approval settles; the pause flow starts exactly once
    let serial = flows[0].correlation_id.clone().unwrap();
    handles.approval.set_result(&serial, ApprovalState::Finished, true);

    let started = manager.run_next_flow(ticket.id).await.unwrap();
    assert_eq!(started, Some(flows[1].id));
    assert!(manager.run_next_flow(ticket.id).await.unwrap().is_none());

    let flows = services.store.ticket_flows(ticket.id).await.unwrap();
    assert_eq!(flows[0].status, FlowStatus::Succeeded);
    assert_eq!(flows[1].status, FlowStatus::Running);
}

#[tokio::test]
async fn ticket_status_follows_the_waiting_flow_kind() {
    let (services, handles) = test_services();
    let manager = TicketFlowManager::new(services.clone());
    let ticket = create_ticket(&*services.store, destroy_request())
        .await
        .unwrap();

    manager.run_next_flow(ticket.id).await.unwrap();
    assert_eq!(
        services.store.ticket(ticket.id).await.unwrap().status,
        TicketStatus::Approving
    );

    let flows = services.store.ticket_flows(ticket.id).await.unwrap();
    let serial = flows[0].correlation_id.clone().unwrap();
    handles.approval.set_result(&serial, ApprovalState::Finished, true);

    manager.run_next_flow(ticket.id).await.unwrap();
    assert_eq!(
        services.store.ticket(ticket.id).await.unwrap().status,
        TicketStatus::AwaitingConfirm
    );
}

#[tokio::test]
async fn rejected_approval_terminates_the_ticket() {
    let (services, handles) = test_services();
    let manager = TicketFlowManager::new(services.clone());
    let ticket = create_ticket(&*services.store, destroy_request())
        .await
        .unwrap();

    manager.run_next_flow(ticket.id).await.unwrap();
    let flows = services.store.ticket_flows(ticket.id).await.unwrap();
    let serial = flows[0].correlation_id.clone().unwrap();

    handles.approval.push_log(&serial, "alice", "submitted");
    handles.approval.push_log(&serial, "bob", "reviewed");
    handles.approval.push_log(&serial, "carol", "rejected: capacity freeze");
    handles.approval.set_result(&serial, ApprovalState::Finished, false);

    manager.update_ticket_status(ticket.id).await.unwrap();
    assert_eq!(
        services.store.ticket(ticket.id).await.unwrap().status,
        TicketStatus::Terminated
    );

    // The mirror todo is settled by the decision-node operator
    let todos = services.store.ticket_todos(ticket.id).await.unwrap();
    assert_eq!(todos[0].done_by.as_deref(), Some("carol"));
}

#[tokio::test]
async fn transient_poll_errors_keep_the_last_known_status() {
    let (services, handles) = test_services();
    let manager = TicketFlowManager::new(services.clone());
    let ticket = create_ticket(&*services.store, destroy_request())
        .await
        .unwrap();

    manager.run_next_flow(ticket.id).await.unwrap();
    assert_eq!(
        services.store.ticket(ticket.id).await.unwrap().status,
        TicketStatus::Approving
    );

    handles.approval.fail_next_polls(1);
    let status = manager.update_ticket_status(ticket.id).await.unwrap();
    assert_eq!(status, TicketStatus::Approving);

    let flows = services.store.ticket_flows(ticket.id).await.unwrap();
    assert_eq!(flows[0].status, FlowStatus::Running);
}

#[tokio::test]
async fn finished_tickets_never_move_again() {
    let (services, handles) = test_services();
    let manager = TicketFlowManager::new(services.clone());
    let ticket = create_ticket(&*services.store, destroy_request())
        .await
        .unwrap();

    // Drive the whole ticket to success
    manager.run_next_flow(ticket.id).await.unwrap();
    let flows = services.store.ticket_flows(ticket.id).await.unwrap();
    let serial = flows[0].correlation_id.clone().unwrap();
    handles.approval.set_result(&serial, ApprovalState::Finished, true);
    manager.run_next_flow(ticket.id).await.unwrap();

    // Resolve the pause by hand and finish the inner flow
    services
        .store
        .set_flow_status(flows[1].id, FlowStatus::Succeeded, None)
        .await
        .unwrap();
    manager.run_next_flow(ticket.id).await.unwrap();
    let flows = services.store.ticket_flows(ticket.id).await.unwrap();
    let root = flows[2].correlation_id.clone().unwrap();
    handles
        .taskgraph
        .set_state(&root, fleetflow::external::TaskGraphState::Finished);

    let status = manager.update_ticket_status(ticket.id).await.unwrap();
    assert_eq!(status, TicketStatus::Succeeded);

    // Repeated recomputation over the finished flow set is inert
    for _ in 0..5 {
        let status = manager.update_ticket_status(ticket.id).await.unwrap();
        assert_eq!(status, TicketStatus::Succeeded);
    }
    assert!(manager.run_next_flow(ticket.id).await.unwrap().is_none());
}

#[tokio::test]
async fn revoking_a_ticket_propagates_outward() {
    let (services, handles) = test_services();
    let manager = TicketFlowManager::new(services.clone());
    let ticket = create_ticket(&*services.store, destroy_request())
        .await
        .unwrap();

    manager.run_next_flow(ticket.id).await.unwrap();
    let flows = services.store.ticket_flows(ticket.id).await.unwrap();
    let serial = flows[0].correlation_id.clone().unwrap();

    manager.revoke_ticket(ticket.id, "alice").await.unwrap();
    // Revoking twice is safe
    manager.revoke_ticket(ticket.id, "alice").await.unwrap();

    assert_eq!(
        services.store.ticket(ticket.id).await.unwrap().status,
        TicketStatus::Terminated
    );
    let snapshot = handles.approval.created_payload(&serial);
    assert!(snapshot.is_some());
    let result = handles
        .approval
        .approval_result(&serial)
        .await
        .unwrap();
    assert_eq!(result.state, ApprovalState::Revoked);

    // All open todos settle as failed
    let todos = services.store.ticket_todos(ticket.id).await.unwrap();
    assert!(todos.iter().all(|t| t.status.is_done()));
}

fn flow_type_strategy() -> impl Strategy<Value = FlowType> {
    prop::sample::select(vec![
        FlowType::ExternalApproval,
        FlowType::InnerFlow,
        FlowType::QuickInnerFlow,
        FlowType::Pause,
        FlowType::Timer,
        FlowType::ResourceApply,
        FlowType::ResourceDeliver,
        FlowType::DescribeTask,
    ])
}

fn flow_status_strategy() -> impl Strategy<Value = FlowStatus> {
    prop::sample::select(vec![
        FlowStatus::Ready,
        FlowStatus::Running,
        FlowStatus::Succeeded,
        FlowStatus::Failed,
        FlowStatus::Terminated,
        FlowStatus::Revoked,
    ])
}

proptest! {
    /// Priority order: Terminated > Failed > Revoked > Running-mapped,
    /// and Succeeded only when every status is finished.
    #[test]
    fn aggregation_respects_priority(
        statuses in prop::collection::vec((flow_type_strategy(), flow_status_strategy()), 1..8)
    ) {
        let result = aggregate_status(&statuses);
        let has = |status: FlowStatus| statuses.iter().any(|(_, s)| *s == status);

        if has(FlowStatus::Terminated) {
            prop_assert_eq!(result, Some(TicketStatus::Terminated));
        } else if has(FlowStatus::Failed) {
            prop_assert_eq!(result, Some(TicketStatus::Failed));
        } else if has(FlowStatus::Revoked) {
            prop_assert_eq!(result, Some(TicketStatus::Revoked));
        } else if has(FlowStatus::Running) {
            let mapped = result.expect("running set must resolve");
            prop_assert!(!mapped.is_finished());
        } else if statuses.iter().all(|(_, s)| s.is_finished()) {
            prop_assert_eq!(result, Some(TicketStatus::Succeeded));
        } else {
            prop_assert_eq!(result, None);
        }
    }

    /// Any permutation of an already-finished status set resolves to
    /// the same ticket status.
    #[test]
    fn aggregation_is_permutation_invariant(
        mut statuses in prop::collection::vec((flow_type_strategy(), flow_status_strategy()), 2..8),
        rotation in 0usize..8
    ) {
        let before = aggregate_status(&statuses);
        let rotation = rotation % statuses.len();
        statuses.rotate_left(rotation);
        let after = aggregate_status(&statuses);

        // Running→mapped depends on the first running flow's kind, so
        // only compare when no flow is running
        if !statuses.iter().any(|(_, s)| *s == FlowStatus::Running) {
            prop_assert_eq!(before, after);
        }
    }
}
