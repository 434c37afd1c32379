//! Shared wiring for unit and integration tests: a [`Services`] bundle
//! backed entirely by the in-memory collaborators, with handles to the
//! concrete types so tests can script them.

use std::sync::Arc;

use crate::external::{
    DbaGroup, InMemoryApproval, InMemoryCmdb, InMemoryResourcePool, InMemoryTaskGraph,
    RecordingNotifier, StaticDbaDirectory,
};
use crate::services::Services;
use crate::store::InMemoryStore;

/// Concrete collaborator handles behind a [`Services`] bundle.
pub struct CollabHandles {
    pub store: Arc<InMemoryStore>,
    pub approval: Arc<InMemoryApproval>,
    pub taskgraph: Arc<InMemoryTaskGraph>,
    pub resources: Arc<InMemoryResourcePool>,
    pub cmdb: Arc<InMemoryCmdb>,
    pub notifier: Arc<RecordingNotifier>,
    pub dba: Arc<StaticDbaDirectory>,
}

/// Default test directory: one primary/secondary/other DBA each, one
/// assistance helper, two designated approvers.
pub fn test_dba_directory() -> StaticDbaDirectory {
    StaticDbaDirectory::new(
        DbaGroup {
            primary: vec!["dba-primary".to_string()],
            secondary: vec!["dba-secondary".to_string()],
            others: vec!["dba-other".to_string()],
            assistance: vec!["helper".to_string()],
        },
        vec!["approver1".to_string(), "approver2".to_string()],
    )
}

/// Fresh service bundle on in-memory collaborators.
pub fn test_services() -> (Services, CollabHandles) {
    let store = Arc::new(InMemoryStore::new());
    let approval = Arc::new(InMemoryApproval::new());
    let taskgraph = Arc::new(InMemoryTaskGraph::new());
    let resources = Arc::new(InMemoryResourcePool::new());
    let cmdb = Arc::new(InMemoryCmdb::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let dba = Arc::new(test_dba_directory());

    let services = Services {
        store: store.clone(),
        approval: approval.clone(),
        taskgraph: taskgraph.clone(),
        resources: resources.clone(),
        cmdb: cmdb.clone(),
        notifier: notifier.clone(),
        dba: dba.clone(),
    };
    let handles = CollabHandles {
        store,
        approval,
        taskgraph,
        resources,
        cmdb,
        notifier,
        dba,
    };
    (services, handles)
}
