//! Integration tests for the dirty/recycle pool driven through real
//! flow failures and retries.

use fleetflow::builders::{create_ticket, TicketRequest};
use fleetflow::external::{ApprovalState, TaskGraphState};
use fleetflow::manager::TicketFlowManager;
use fleetflow::models::{
    Host, MachineEventType, MachinePool, TicketStatus, TicketType, TodoAction, TodoType,
};
use fleetflow::pool::MachinePoolManager;
use fleetflow::store::TicketStore;
use fleetflow::test_support::test_services;
use fleetflow::todos::TodoManager;

fn apply_request() -> TicketRequest {
    TicketRequest {
        biz_id: 1,
        ticket_type: TicketType::ClusterApply,
        creator: "alice".to_string(),
        group: "mysql".to_string(),
        remark: String::new(),
        details: serde_json::json!({
            "resource_spec": { "group": "mysql", "count": 2 }
        }),
    }
}

/// Drive the ticket until the manager has nothing left to start.
async fn drive(manager: &TicketFlowManager, ticket_id: uuid::Uuid) {
    for _ in 0..8 {
        manager.update_ticket_status(ticket_id).await.unwrap();
        if manager.run_next_flow(ticket_id).await.unwrap().is_none() {
            break;
        }
    }
}

/// Bring a cluster-apply ticket to the point where its inner flow runs.
async fn reach_inner_flow(
    services: &fleetflow::services::Services,
    handles: &fleetflow::test_support::CollabHandles,
    manager: &TicketFlowManager,
) -> fleetflow::models::Ticket {
    handles.resources.add_hosts(vec![
        Host::new(1, "10.0.0.1"),
        Host::new(2, "10.0.0.2"),
    ]);
    let ticket = create_ticket(&*services.store, apply_request())
        .await
        .unwrap();

    drive(manager, ticket.id).await;
    let flows = services.store.ticket_flows(ticket.id).await.unwrap();
    let serial = flows[0].correlation_id.clone().unwrap();
    handles.approval.set_result(&serial, ApprovalState::Finished, true);
    drive(manager, ticket.id).await;

    let loaded = services.store.ticket(ticket.id).await.unwrap();
    assert_eq!(loaded.status, TicketStatus::Running);
    loaded
}

#[tokio::test]
async fn deploy_failure_flags_hosts_dirty_without_logging() {
    let (services, handles) = test_services();
    let manager = TicketFlowManager::new(services.clone());
    let ticket = reach_inner_flow(&services, &handles, &manager).await;

    let flows = services.store.ticket_flows(ticket.id).await.unwrap();
    let root = flows[2].correlation_id.clone().unwrap();
    handles.taskgraph.set_state(&root, TaskGraphState::Failed);

    manager.update_ticket_status(ticket.id).await.unwrap();
    assert_eq!(
        services.store.ticket(ticket.id).await.unwrap().status,
        TicketStatus::Failed
    );

    for host_id in [1, 2] {
        let record = services.store.pool_record(host_id).await.unwrap().unwrap();
        assert_eq!(record.pool, MachinePool::Dirty);
        assert_eq!(record.ticket_id, Some(ticket.id));

        // Membership change only: the last logged event is still the
        // allocation, not a ToDirty entry
        let latest = services
            .store
            .latest_machine_event(host_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.event, MachineEventType::ApplyResource);
    }
}

#[tokio::test]
async fn retry_clears_dirty_flags_before_reflagging() {
    let (services, handles) = test_services();
    let manager = TicketFlowManager::new(services.clone());
    let ticket = reach_inner_flow(&services, &handles, &manager).await;

    let flows = services.store.ticket_flows(ticket.id).await.unwrap();
    let root = flows[2].correlation_id.clone().unwrap();
    handles.taskgraph.set_state(&root, TaskGraphState::Failed);
    manager.update_ticket_status(ticket.id).await.unwrap();
    assert!(services.store.pool_record(1).await.unwrap().is_some());

    // Retry through the inner-failed todo: leaving the failed state
    // un-flags the hosts and kicks a fresh graph
    let todos_mgr = TodoManager::new(services.clone());
    let pending = todos_mgr.pending_for_user("alice").await.unwrap();
    let retry_todo = pending
        .iter()
        .find(|t| t.todo_type == TodoType::InnerFailed)
        .expect("inner-failed todo exists");
    todos_mgr
        .complete(retry_todo.id, "alice", TodoAction::Approve)
        .await
        .unwrap();

    assert!(services.store.pool_record(1).await.unwrap().is_none());
    assert!(services.store.pool_record(2).await.unwrap().is_none());
    assert_eq!(
        services.store.ticket(ticket.id).await.unwrap().status,
        TicketStatus::Running
    );

    // Second failure flags the same hosts again
    let flows = services.store.ticket_flows(ticket.id).await.unwrap();
    let new_root = flows[2].correlation_id.clone().unwrap();
    assert_ne!(new_root, root);
    handles.taskgraph.set_state(&new_root, TaskGraphState::Failed);
    manager.update_ticket_status(ticket.id).await.unwrap();

    let record = services.store.pool_record(1).await.unwrap().unwrap();
    assert_eq!(record.pool, MachinePool::Dirty);
}

#[tokio::test]
async fn fault_to_recycle_to_recycled_walks_the_legal_path() {
    let (services, handles) = test_services();
    let pool = MachinePoolManager::new(services.clone());
    let hosts = vec![Host::new(9, "10.0.0.9")];

    pool.mark_fault(&hosts, None, "dba").await.unwrap();
    pool.transfer(&hosts, MachinePool::Fault, MachinePool::Recycle, None, "dba")
        .await
        .unwrap();
    pool.transfer(&hosts, MachinePool::Recycle, MachinePool::Recycled, None, "dba")
        .await
        .unwrap();

    assert!(services.store.pool_record(9).await.unwrap().is_none());
    assert_eq!(handles.cmdb.transferred_hosts(), hosts);
    assert_eq!(handles.cmdb.recycled_hosts(), hosts);

    let events = services.store.machine_events(9).await.unwrap();
    let kinds: Vec<MachineEventType> = events.iter().map(|e| e.event).collect();
    assert_eq!(
        kinds,
        vec![
            MachineEventType::ToFault,
            MachineEventType::ToRecycle,
            MachineEventType::Recycled
        ]
    );
}

#[tokio::test]
async fn terminated_ticket_returns_unused_allocated_hosts() {
    let (services, handles) = test_services();
    let manager = TicketFlowManager::new(services.clone());
    let ticket = reach_inner_flow(&services, &handles, &manager).await;

    // Revoke while the deploy runs: the hosts were allocated but never
    // delivered, and nothing quarantined them
    manager.revoke_ticket(ticket.id, "alice").await.unwrap();

    assert_eq!(
        services.store.ticket(ticket.id).await.unwrap().status,
        TicketStatus::Terminated
    );
    let returned = handles.resources.returned_hosts();
    assert_eq!(returned.len(), 2);
    let latest = services.store.latest_machine_event(1).await.unwrap().unwrap();
    assert_eq!(latest.event, MachineEventType::ReturnResource);
}
