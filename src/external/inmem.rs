//! In-memory collaborator implementations.
//!
//! Scripted stand-ins for the real external systems: tests drive them
//! directly (set an approval outcome, flip a task-graph state, drain a
//! host pool) and the local runner wires them in where no real services
//! are reachable. No side effects outside the process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::external::{
    ApprovalLogEntry, ApprovalService, ApprovalSnapshot, ApprovalState, CmdbClient, DbaDirectory,
    DbaGroup, ExternalError, Notifier, ResourcePool, ResourceRequest, TaskGraphEngine,
    TaskGraphState,
};
use crate::models::{Host, TicketStatus, Todo};

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------
// Approval service
// ---------------------------------------------------------------------

#[derive(Default)]
struct ApprovalRecord {
    snapshot: ApprovalSnapshot,
    logs: Vec<ApprovalLogEntry>,
    payload: serde_json::Value,
}

/// Scripted approval service. Freshly created tickets report Running
/// until a test (or operator of the local runner) settles them.
#[derive(Default)]
pub struct InMemoryApproval {
    serial_seq: AtomicU64,
    records: Mutex<HashMap<String, ApprovalRecord>>,
    log_queries: AtomicU64,
    fail_polls: AtomicU64,
}

impl InMemoryApproval {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settle the approval outcome for a serial.
    pub fn set_result(&self, serial: &str, state: ApprovalState, approved: bool) {
        let mut records = locked(&self.records);
        if let Some(record) = records.get_mut(serial) {
            record.snapshot.state = state;
            record.snapshot.approved = approved;
            record.snapshot.updated_at = Some(Utc::now());
        }
    }

    pub fn push_log(&self, serial: &str, operator: &str, message: &str) {
        let mut records = locked(&self.records);
        if let Some(record) = records.get_mut(serial) {
            record.logs.push(ApprovalLogEntry {
                operator: operator.to_string(),
                message: message.to_string(),
            });
        }
    }

    /// Make the next `n` polls fail with a transient error.
    pub fn fail_next_polls(&self, n: u64) {
        self.fail_polls.store(n, Ordering::SeqCst);
    }

    pub fn created_payload(&self, serial: &str) -> Option<serde_json::Value> {
        locked(&self.records).get(serial).map(|r| r.payload.clone())
    }

    pub fn log_query_count(&self) -> u64 {
        self.log_queries.load(Ordering::SeqCst)
    }

    fn take_poll_failure(&self) -> bool {
        self.fail_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ApprovalService for InMemoryApproval {
    async fn create_ticket(&self, payload: &serde_json::Value) -> Result<String, ExternalError> {
        if payload.is_null() {
            return Err(ExternalError::Rejected {
                service: "approval",
                reason: "empty payload".to_string(),
            });
        }
        let serial = format!("APPROVAL-{:06}", self.serial_seq.fetch_add(1, Ordering::SeqCst));
        let record = ApprovalRecord {
            snapshot: ApprovalSnapshot {
                ticket_url: format!("https://itsm.example.com/ticket/{serial}"),
                ..ApprovalSnapshot::default()
            },
            logs: Vec::new(),
            payload: payload.clone(),
        };
        locked(&self.records).insert(serial.clone(), record);
        Ok(serial)
    }

    async fn approval_result(&self, serial: &str) -> Result<ApprovalSnapshot, ExternalError> {
        if self.take_poll_failure() {
            return Err(ExternalError::Transient {
                service: "approval",
                reason: "injected poll failure".to_string(),
            });
        }
        locked(&self.records)
            .get(serial)
            .map(|r| r.snapshot.clone())
            .ok_or_else(|| ExternalError::UnknownKey {
                service: "approval",
                key: serial.to_string(),
            })
    }

    async fn ticket_logs(&self, serial: &str) -> Result<Vec<ApprovalLogEntry>, ExternalError> {
        self.log_queries.fetch_add(1, Ordering::SeqCst);
        locked(&self.records)
            .get(serial)
            .map(|r| r.logs.clone())
            .ok_or_else(|| ExternalError::UnknownKey {
                service: "approval",
                key: serial.to_string(),
            })
    }

    async fn withdraw(&self, serial: &str, operator: &str) -> Result<(), ExternalError> {
        let mut records = locked(&self.records);
        let record = records
            .get_mut(serial)
            .ok_or_else(|| ExternalError::UnknownKey {
                service: "approval",
                key: serial.to_string(),
            })?;
        record.snapshot.state = ApprovalState::Revoked;
        record.snapshot.updated_at = Some(Utc::now());
        record.logs.push(ApprovalLogEntry {
            operator: operator.to_string(),
            message: "withdrawn".to_string(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Task-graph engine
// ---------------------------------------------------------------------

/// Scripted task-graph engine: graphs sit in Running until a test
/// advances them with `set_state`.
#[derive(Default)]
pub struct InMemoryTaskGraph {
    root_seq: AtomicU64,
    states: Mutex<HashMap<String, TaskGraphState>>,
    graphs: Mutex<HashMap<String, serde_json::Value>>,
}

impl InMemoryTaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_state(&self, root_id: &str, state: TaskGraphState) {
        locked(&self.states).insert(root_id.to_string(), state);
    }

    pub fn started_graph(&self, root_id: &str) -> Option<serde_json::Value> {
        locked(&self.graphs).get(root_id).cloned()
    }

    pub fn started_count(&self) -> usize {
        locked(&self.graphs).len()
    }
}

#[async_trait]
impl TaskGraphEngine for InMemoryTaskGraph {
    async fn start(&self, graph: &serde_json::Value) -> Result<String, ExternalError> {
        let root_id = format!("graph-{:06}", self.root_seq.fetch_add(1, Ordering::SeqCst));
        locked(&self.graphs).insert(root_id.clone(), graph.clone());
        locked(&self.states).insert(root_id.clone(), TaskGraphState::Running);
        Ok(root_id)
    }

    async fn state(&self, root_id: &str) -> Result<TaskGraphState, ExternalError> {
        locked(&self.states)
            .get(root_id)
            .copied()
            .ok_or_else(|| ExternalError::UnknownKey {
                service: "taskgraph",
                key: root_id.to_string(),
            })
    }

    async fn revoke(&self, root_id: &str) -> Result<(), ExternalError> {
        let mut states = locked(&self.states);
        let state = states
            .get_mut(root_id)
            .ok_or_else(|| ExternalError::UnknownKey {
                service: "taskgraph",
                key: root_id.to_string(),
            })?;
        *state = TaskGraphState::Revoked;
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Resource pool
// ---------------------------------------------------------------------

/// Host pool backed by a free list; allocation drains it in order.
#[derive(Default)]
pub struct InMemoryResourcePool {
    free: Mutex<Vec<Host>>,
    applied: Mutex<Vec<Host>>,
    returned: Mutex<Vec<Host>>,
    imported: Mutex<Vec<Host>>,
}

impl InMemoryResourcePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hosts(hosts: Vec<Host>) -> Self {
        let pool = Self::default();
        *locked(&pool.free) = hosts;
        pool
    }

    pub fn add_hosts(&self, hosts: Vec<Host>) {
        locked(&self.free).extend(hosts);
    }

    pub fn free_count(&self) -> usize {
        locked(&self.free).len()
    }

    pub fn returned_hosts(&self) -> Vec<Host> {
        locked(&self.returned).clone()
    }
}

#[async_trait]
impl ResourcePool for InMemoryResourcePool {
    async fn apply(&self, request: &ResourceRequest) -> Result<Vec<Host>, ExternalError> {
        let mut free = locked(&self.free);
        let want = request.count as usize;
        if free.len() < want {
            return Err(ExternalError::CapacityShortage(format!(
                "requested {} hosts for group {}, {} available",
                request.count,
                request.group,
                free.len()
            )));
        }
        let hosts: Vec<Host> = free.drain(..want).collect();
        locked(&self.applied).extend(hosts.iter().cloned());
        Ok(hosts)
    }

    async fn return_hosts(&self, hosts: &[Host]) -> Result<(), ExternalError> {
        locked(&self.returned).extend(hosts.iter().cloned());
        locked(&self.free).extend(hosts.iter().cloned());
        Ok(())
    }

    async fn import(&self, hosts: &[Host]) -> Result<(), ExternalError> {
        locked(&self.imported).extend(hosts.iter().cloned());
        locked(&self.free).extend(hosts.iter().cloned());
        Ok(())
    }
}

// ---------------------------------------------------------------------
// CMDB
// ---------------------------------------------------------------------

/// Records topology calls so tests can assert on terminal transitions.
#[derive(Default)]
pub struct InMemoryCmdb {
    transferred: Mutex<Vec<Host>>,
    recycled: Mutex<Vec<Host>>,
}

impl InMemoryCmdb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transferred_hosts(&self) -> Vec<Host> {
        locked(&self.transferred).clone()
    }

    pub fn recycled_hosts(&self) -> Vec<Host> {
        locked(&self.recycled).clone()
    }
}

#[async_trait]
impl CmdbClient for InMemoryCmdb {
    async fn transfer_to_recycle_module(&self, hosts: &[Host]) -> Result<(), ExternalError> {
        locked(&self.transferred).extend(hosts.iter().cloned());
        Ok(())
    }

    async fn recycle_hosts(&self, hosts: &[Host]) -> Result<(), ExternalError> {
        locked(&self.recycled).extend(hosts.iter().cloned());
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Notifiers
// ---------------------------------------------------------------------

/// Notifier that records every dispatch, for assertions.
#[derive(Default)]
pub struct RecordingNotifier {
    statuses: Mutex<Vec<(Uuid, TicketStatus)>>,
    todos: Mutex<Vec<Uuid>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status_notifications(&self) -> Vec<(Uuid, TicketStatus)> {
        locked(&self.statuses).clone()
    }

    pub fn todo_notifications(&self) -> Vec<Uuid> {
        locked(&self.todos).clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_status(
        &self,
        ticket_id: Uuid,
        status: TicketStatus,
    ) -> Result<(), ExternalError> {
        locked(&self.statuses).push((ticket_id, status));
        Ok(())
    }

    async fn notify_todo(&self, todo: &Todo) -> Result<(), ExternalError> {
        locked(&self.todos).push(todo.id);
        Ok(())
    }
}

/// Notifier that only writes structured log lines; the local runner's
/// default.
#[derive(Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_status(
        &self,
        ticket_id: Uuid,
        status: TicketStatus,
    ) -> Result<(), ExternalError> {
        info!(ticket_id = %ticket_id, status = ?status, "ticket status notification");
        Ok(())
    }

    async fn notify_todo(&self, todo: &Todo) -> Result<(), ExternalError> {
        info!(
            todo_id = %todo.id,
            ticket_id = %todo.ticket_id,
            operators = ?todo.operators,
            "todo notification"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------
// DBA directory
// ---------------------------------------------------------------------

/// Directory with a default assignment set and optional per-business
/// overrides.
#[derive(Default)]
pub struct StaticDbaDirectory {
    default_group: DbaGroup,
    default_approvers: Vec<String>,
    group_overrides: Mutex<HashMap<(u64, String), DbaGroup>>,
    approver_overrides: Mutex<HashMap<u64, Vec<String>>>,
}

impl StaticDbaDirectory {
    pub fn new(default_group: DbaGroup, default_approvers: Vec<String>) -> Self {
        Self {
            default_group,
            default_approvers,
            ..Self::default()
        }
    }

    pub fn set_group(&self, biz_id: u64, group: &str, dbas: DbaGroup) {
        locked(&self.group_overrides).insert((biz_id, group.to_string()), dbas);
    }

    pub fn set_approvers(&self, biz_id: u64, approvers: Vec<String>) {
        locked(&self.approver_overrides).insert(biz_id, approvers);
    }
}

#[async_trait]
impl DbaDirectory for StaticDbaDirectory {
    async fn dba_group(&self, biz_id: u64, group: &str) -> DbaGroup {
        locked(&self.group_overrides)
            .get(&(biz_id, group.to_string()))
            .cloned()
            .unwrap_or_else(|| self.default_group.clone())
    }

    async fn approvers(&self, biz_id: u64) -> Vec<String> {
        locked(&self.approver_overrides)
            .get(&biz_id)
            .cloned()
            .unwrap_or_else(|| self.default_approvers.clone())
    }
}
