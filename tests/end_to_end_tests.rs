//! End-to-end scenarios: a cluster-apply ticket from creation through
//! approval, allocation, execution, and the failure bookkeeping.

use fleetflow::builders::{create_ticket, TicketRequest};
use fleetflow::external::{ApprovalState, TaskGraphState};
use fleetflow::manager::TicketFlowManager;
use fleetflow::models::{
    FlowStatus, Host, MachinePool, TicketStatus, TicketType, TodoStatus, TodoType,
};
use fleetflow::store::TicketStore;
use fleetflow::test_support::test_services;

fn apply_request() -> TicketRequest {
    TicketRequest {
        biz_id: 7,
        ticket_type: TicketType::ClusterApply,
        creator: "alice".to_string(),
        group: "mysql".to_string(),
        remark: "new order cluster".to_string(),
        details: serde_json::json!({
            "resource_spec": { "group": "mysql", "count": 2 },
            "cluster_name": "orders-01"
        }),
    }
}

async fn drive(manager: &TicketFlowManager, ticket_id: uuid::Uuid) {
    for _ in 0..8 {
        manager.update_ticket_status(ticket_id).await.unwrap();
        if manager.run_next_flow(ticket_id).await.unwrap().is_none() {
            break;
        }
    }
}

#[tokio::test]
async fn cluster_apply_failure_scenario() {
    let (services, handles) = test_services();
    let manager = TicketFlowManager::new(services.clone());
    handles.resources.add_hosts(vec![
        Host::new(101, "10.1.0.1"),
        Host::new(102, "10.1.0.2"),
    ]);

    // Ticket created with its flow sequence expanded
    let ticket = create_ticket(&*services.store, apply_request())
        .await
        .unwrap();
    assert_eq!(ticket.status, TicketStatus::Pending);

    // Approval flow starts: todo for the designated approver, ticket in
    // the approving state
    drive(&manager, ticket.id).await;
    assert_eq!(
        services.store.ticket(ticket.id).await.unwrap().status,
        TicketStatus::Approving
    );
    let todos = services.store.ticket_todos(ticket.id).await.unwrap();
    let itsm_todo = todos
        .iter()
        .find(|t| t.todo_type == TodoType::Itsm)
        .expect("itsm todo created");
    assert_eq!(itsm_todo.operators, vec!["approver1"]);
    assert_eq!(itsm_todo.helpers, vec!["approver2"]);

    // The external approval finishes approved
    let flows = services.store.ticket_flows(ticket.id).await.unwrap();
    let serial = flows[0].correlation_id.clone().unwrap();
    handles.approval.push_log(&serial, "alice", "submitted");
    handles.approval.push_log(&serial, "bob", "first review passed");
    handles.approval.push_log(&serial, "approver1", "approved");
    handles.approval.set_result(&serial, ApprovalState::Finished, true);

    // Allocation runs and the deploy graph starts on the new hosts
    drive(&manager, ticket.id).await;
    let flows = services.store.ticket_flows(ticket.id).await.unwrap();
    assert_eq!(flows[0].status, FlowStatus::Succeeded);
    assert_eq!(flows[1].status, FlowStatus::Succeeded);
    assert_eq!(flows[2].status, FlowStatus::Running);
    assert_eq!(
        services.store.ticket(ticket.id).await.unwrap().status,
        TicketStatus::Running
    );

    let itsm_todo = services.store.todo(itsm_todo.id).await.unwrap();
    assert_eq!(itsm_todo.status, TodoStatus::DoneSuccess);
    assert_eq!(itsm_todo.done_by.as_deref(), Some("approver1"));

    // The hosts flow into the deploy graph's parameters
    let deploy_hosts: Vec<Host> =
        serde_json::from_value(flows[2].details.get("hosts").cloned().unwrap()).unwrap();
    assert_eq!(deploy_hosts.len(), 2);

    // The deploy fails underneath
    let root = flows[2].correlation_id.clone().unwrap();
    handles.taskgraph.set_state(&root, TaskGraphState::Failed);
    drive(&manager, ticket.id).await;

    assert_eq!(
        services.store.ticket(ticket.id).await.unwrap().status,
        TicketStatus::Failed
    );
    let flows = services.store.ticket_flows(ticket.id).await.unwrap();
    assert_eq!(flows[2].status, FlowStatus::Failed);

    // Requested hosts are quarantined in the dirty pool
    for host_id in [101, 102] {
        let record = services.store.pool_record(host_id).await.unwrap().unwrap();
        assert_eq!(record.pool, MachinePool::Dirty);
    }

    // A retry-or-terminate todo is waiting on the creator and DBAs
    let todos = services.store.ticket_todos(ticket.id).await.unwrap();
    let failed_todo = todos
        .iter()
        .find(|t| t.todo_type == TodoType::InnerFailed)
        .expect("inner-failed todo created");
    assert!(failed_todo.operators.contains(&"alice".to_string()));
    assert!(failed_todo.operators.contains(&"dba-primary".to_string()));
}

#[tokio::test]
async fn cluster_apply_success_scenario() {
    let (services, handles) = test_services();
    let manager = TicketFlowManager::new(services.clone());
    handles.resources.add_hosts(vec![
        Host::new(201, "10.2.0.1"),
        Host::new(202, "10.2.0.2"),
    ]);

    let ticket = create_ticket(&*services.store, apply_request())
        .await
        .unwrap();

    drive(&manager, ticket.id).await;
    let flows = services.store.ticket_flows(ticket.id).await.unwrap();
    let serial = flows[0].correlation_id.clone().unwrap();
    handles.approval.set_result(&serial, ApprovalState::Finished, true);
    drive(&manager, ticket.id).await;

    let flows = services.store.ticket_flows(ticket.id).await.unwrap();
    let root = flows[2].correlation_id.clone().unwrap();
    handles.taskgraph.set_state(&root, TaskGraphState::Finished);
    drive(&manager, ticket.id).await;

    let loaded = services.store.ticket(ticket.id).await.unwrap();
    assert_eq!(loaded.status, TicketStatus::Succeeded);

    let flows = services.store.ticket_flows(ticket.id).await.unwrap();
    assert!(flows.iter().all(|f| f.status == FlowStatus::Succeeded));
    assert!(flows.iter().all(|f| f.started_at.is_some()));
    assert!(flows.iter().all(|f| f.ended_at.is_some()));

    // Delivered hosts stay with the business: no returns, no pool rows
    assert!(handles.resources.returned_hosts().is_empty());
    assert!(services.store.pool_record(201).await.unwrap().is_none());

    // A success notification went out (running states stay quiet)
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let notices = handles.notifier.status_notifications();
    assert!(notices
        .iter()
        .any(|(id, status)| *id == ticket.id && *status == TicketStatus::Succeeded));
    assert!(notices
        .iter()
        .all(|(_, status)| *status != TicketStatus::Running));
}

#[tokio::test]
async fn cluster_switch_waits_on_its_timer() {
    let (services, handles) = test_services();
    let manager = TicketFlowManager::new(services.clone());

    let future = (chrono::Utc::now() + chrono::Duration::hours(2)).to_rfc3339();
    let ticket = create_ticket(
        &*services.store,
        TicketRequest {
            biz_id: 7,
            ticket_type: TicketType::ClusterSwitch,
            creator: "alice".to_string(),
            group: "mysql".to_string(),
            remark: String::new(),
            details: serde_json::json!({ "trigger_at": future }),
        },
    )
    .await
    .unwrap();

    drive(&manager, ticket.id).await;
    let flows = services.store.ticket_flows(ticket.id).await.unwrap();
    let serial = flows[0].correlation_id.clone().unwrap();
    handles.approval.set_result(&serial, ApprovalState::Finished, true);
    drive(&manager, ticket.id).await;

    // Parked on the timer; the quick inner flow has not started
    assert_eq!(
        services.store.ticket(ticket.id).await.unwrap().status,
        TicketStatus::Scheduled
    );
    let flows = services.store.ticket_flows(ticket.id).await.unwrap();
    assert_eq!(flows[2].status, FlowStatus::Ready);

    // Pull the trigger time into the past; the switch proceeds
    let due = (chrono::Utc::now() - chrono::Duration::seconds(5)).to_rfc3339();
    services
        .store
        .set_flow_details(flows[1].id, serde_json::json!({ "trigger_at": due }))
        .await
        .unwrap();
    drive(&manager, ticket.id).await;

    let flows = services.store.ticket_flows(ticket.id).await.unwrap();
    assert_eq!(flows[1].status, FlowStatus::Succeeded);
    assert_eq!(flows[2].status, FlowStatus::Running);

    let root = flows[2].correlation_id.clone().unwrap();
    handles.taskgraph.set_state(&root, TaskGraphState::Finished);
    drive(&manager, ticket.id).await;
    assert_eq!(
        services.store.ticket(ticket.id).await.unwrap().status,
        TicketStatus::Succeeded
    );
}

#[tokio::test]
async fn host_recycle_ignores_the_graph_outcome() {
    let (services, handles) = test_services();
    let manager = TicketFlowManager::new(services.clone());

    let ticket = create_ticket(
        &*services.store,
        TicketRequest {
            biz_id: 7,
            ticket_type: TicketType::HostRecycle,
            creator: "alice".to_string(),
            group: "mysql".to_string(),
            remark: String::new(),
            details: serde_json::json!({ "host_ids": [501, 502] }),
        },
    )
    .await
    .unwrap();

    // No approval gate: the graph kicks off and the ticket completes
    // without anyone consulting the graph's outcome
    drive(&manager, ticket.id).await;

    assert_eq!(handles.taskgraph.started_count(), 1);
    assert_eq!(
        services.store.ticket(ticket.id).await.unwrap().status,
        TicketStatus::Succeeded
    );
}

#[tokio::test]
async fn capacity_shortage_waits_for_replenishment() {
    let (services, handles) = test_services();
    let manager = TicketFlowManager::new(services.clone());
    // Only one host free, the request needs two

    handles.resources.add_hosts(vec![Host::new(301, "10.3.0.1")]);

    let ticket = create_ticket(&*services.store, apply_request())
        .await
        .unwrap();
    drive(&manager, ticket.id).await;

    let flows = services.store.ticket_flows(ticket.id).await.unwrap();
    let serial = flows[0].correlation_id.clone().unwrap();
    handles.approval.set_result(&serial, ApprovalState::Finished, true);
    drive(&manager, ticket.id).await;

    // The ticket parks in the replenish state with a todo
    assert_eq!(
        services.store.ticket(ticket.id).await.unwrap().status,
        TicketStatus::ResourceReplenish
    );
    let todos = services.store.ticket_todos(ticket.id).await.unwrap();
    let replenish = todos
        .iter()
        .find(|t| t.todo_type == TodoType::ResourceReplenish)
        .expect("replenish todo created");

    // Pool refilled; retrying the todo resumes the ticket
    handles.resources.add_hosts(vec![Host::new(302, "10.3.0.2")]);
    let todos_mgr = fleetflow::todos::TodoManager::new(services.clone());
    todos_mgr
        .complete(replenish.id, "alice", fleetflow::models::TodoAction::Approve)
        .await
        .unwrap();

    let flows = services.store.ticket_flows(ticket.id).await.unwrap();
    assert_eq!(flows[1].status, FlowStatus::Succeeded);
    assert_eq!(flows[2].status, FlowStatus::Running);
    assert_eq!(
        services.store.ticket(ticket.id).await.unwrap().status,
        TicketStatus::Running
    );
}
