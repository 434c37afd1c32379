//! Shared handle bundle for the orchestration engine.

use std::sync::Arc;

use crate::external::{
    ApprovalService, CmdbClient, DbaDirectory, Notifier, ResourcePool, TaskGraphEngine,
};
use crate::store::TicketStore;

/// Everything a stage, manager, or pool handler needs to do its work.
/// Cheap to clone; all handles are shared.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn TicketStore>,
    pub approval: Arc<dyn ApprovalService>,
    pub taskgraph: Arc<dyn TaskGraphEngine>,
    pub resources: Arc<dyn ResourcePool>,
    pub cmdb: Arc<dyn CmdbClient>,
    pub notifier: Arc<dyn Notifier>,
    pub dba: Arc<dyn DbaDirectory>,
}
