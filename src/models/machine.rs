use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A managed host, identified by its CMDB host id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Host {
    pub host_id: u64,
    pub ip: String,
}

impl Host {
    pub fn new(host_id: u64, ip: impl Into<String>) -> Self {
        Self {
            host_id,
            ip: ip.into(),
        }
    }
}

/// Pools a host can sit in. A host is in exactly one pool at a time.
///
/// Resource and Recycled are terminal for the membership table: reaching
/// them deletes the pool row (the table is a current-state projection,
/// the event log is the history).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachinePool {
    /// Free pool, available for allocation
    Resource,
    /// Generic quarantine after a flow failure
    Dirty,
    /// Classified as faulty, pending recycle
    Fault,
    /// Pending physical return
    Recycle,
    /// Returned and removed from tracking
    Recycled,
}

impl MachinePool {
    /// Pools whose membership rows are upserted in place rather than
    /// deleted on entry.
    pub fn is_first_managed(&self) -> bool {
        matches!(
            self,
            MachinePool::Dirty | MachinePool::Fault | MachinePool::Recycle
        )
    }
}

/// Lifecycle transitions recorded in the append-only event log.
///
/// ToDirty pool entries are deliberately absent here as log appends:
/// dirty quarantine is a transient membership flag, and logging it would
/// mask the import provenance `hosts_can_return` relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineEventType {
    ImportResource,
    ApplyResource,
    ReturnResource,
    ToDirty,
    ToRecycle,
    ToFault,
    UndoImport,
    Recycled,
}

/// Current pool membership of one host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PooledMachine {
    pub host: Host,
    pub pool: MachinePool,
    pub ticket_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl PooledMachine {
    pub fn new(host: Host, pool: MachinePool, ticket_id: Option<Uuid>) -> Self {
        Self {
            host,
            pool,
            ticket_id,
            updated_at: Utc::now(),
        }
    }
}

/// One entry of the append-only host lifecycle log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineEvent {
    pub id: Uuid,
    pub host: Host,
    pub event: MachineEventType,
    pub ticket_id: Option<Uuid>,
    pub creator: String,
    pub created_at: DateTime<Utc>,
}

impl MachineEvent {
    pub fn new(
        host: Host,
        event: MachineEventType,
        ticket_id: Option<Uuid>,
        creator: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            host,
            event,
            ticket_id,
            creator: creator.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_managed_pools_upsert_in_place() {
        assert!(MachinePool::Dirty.is_first_managed());
        assert!(MachinePool::Fault.is_first_managed());
        assert!(MachinePool::Recycle.is_first_managed());
        assert!(!MachinePool::Resource.is_first_managed());
        assert!(!MachinePool::Recycled.is_first_managed());
    }
}
