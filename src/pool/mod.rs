//! Dirty/recycle machine pool: a satellite state machine tracking where
//! hosts sit while tickets succeed and fail around them.
//!
//! The membership table is a current-state projection; the event log is
//! the history. ToDirty membership changes are never appended to the
//! log — dirty quarantine is transient, and logging it would mask the
//! import provenance `hosts_can_return` checks.

use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::external::{CmdbClient, ExternalError, ResourcePool};
use crate::models::{
    Flow, FlowStatus, Host, MachineEvent, MachineEventType, MachinePool, PooledMachine, Ticket,
};
use crate::services::Services;
use crate::stages::resource::ResourceApplyStage;
use crate::store::{StoreError, TicketStore};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("transfer from {from_pool:?} to {target:?} is not allowed")]
    TransferNotAllowed {
        from_pool: MachinePool,
        target: MachinePool,
    },
    #[error("host {host_id} is not in the {pool:?} pool")]
    HostNotInPool { host_id: u64, pool: MachinePool },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    External(#[from] ExternalError),
}

pub struct MachinePoolManager {
    services: Services,
}

impl MachinePoolManager {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    /// Operator-invoked pool transfer. Exactly two are legal:
    /// Fault→Recycle and Recycle→Recycled.
    pub async fn transfer(
        &self,
        hosts: &[Host],
        source: MachinePool,
        target: MachinePool,
        ticket_id: Option<Uuid>,
        operator: &str,
    ) -> Result<(), PoolError> {
        match (source, target) {
            (MachinePool::Fault, MachinePool::Recycle) => {
                self.check_membership(hosts, source).await?;
                for host in hosts {
                    self.services
                        .store
                        .upsert_pool_record(PooledMachine::new(
                            host.clone(),
                            MachinePool::Recycle,
                            ticket_id,
                        ))
                        .await?;
                    self.log_event(host, MachineEventType::ToRecycle, ticket_id, operator)
                        .await?;
                }
                info!(count = hosts.len(), operator, "hosts moved to the recycle pool");
                Ok(())
            }
            (MachinePool::Recycle, MachinePool::Recycled) => {
                self.check_membership(hosts, source).await?;
                // Terminal: hand the hosts to the topology service and
                // drop them from tracking
                self.services.cmdb.transfer_to_recycle_module(hosts).await?;
                self.services.cmdb.recycle_hosts(hosts).await?;
                for host in hosts {
                    self.services.store.remove_pool_record(host.host_id).await?;
                    self.log_event(host, MachineEventType::Recycled, ticket_id, operator)
                        .await?;
                }
                info!(count = hosts.len(), operator, "hosts recycled and untracked");
                Ok(())
            }
            _ => Err(PoolError::TransferNotAllowed {
                from_pool: source,
                target,
            }),
        }
    }

    async fn check_membership(&self, hosts: &[Host], pool: MachinePool) -> Result<(), PoolError> {
        for host in hosts {
            let record = self.services.store.pool_record(host.host_id).await?;
            match record {
                Some(record) if record.pool == pool => {}
                _ => {
                    return Err(PoolError::HostNotInPool {
                        host_id: host.host_id,
                        pool,
                    })
                }
            }
        }
        Ok(())
    }

    async fn log_event(
        &self,
        host: &Host,
        event: MachineEventType,
        ticket_id: Option<Uuid>,
        creator: &str,
    ) -> Result<(), PoolError> {
        self.services
            .store
            .append_machine_event(MachineEvent::new(
                host.clone(),
                event,
                ticket_id,
                creator.to_string(),
            ))
            .await?;
        Ok(())
    }

    /// Quarantine hosts after a flow failure. Membership change only —
    /// deliberately no event-log append.
    pub async fn mark_dirty(&self, hosts: &[Host], ticket_id: Uuid) -> Result<(), PoolError> {
        for host in hosts {
            self.services
                .store
                .upsert_pool_record(PooledMachine::new(
                    host.clone(),
                    MachinePool::Dirty,
                    Some(ticket_id),
                ))
                .await?;
        }
        debug!(ticket_id = %ticket_id, count = hosts.len(), "hosts flagged dirty");
        Ok(())
    }

    /// Un-flag the dirty hosts a ticket quarantined (retry path).
    pub async fn unmark_dirty(&self, ticket_id: Uuid) -> Result<(), PoolError> {
        let dirty = self.services.store.pool_members(MachinePool::Dirty).await?;
        let mut removed = 0usize;
        for record in dirty.into_iter().filter(|r| r.ticket_id == Some(ticket_id)) {
            self.services
                .store
                .remove_pool_record(record.host.host_id)
                .await?;
            removed += 1;
        }
        if removed > 0 {
            debug!(ticket_id = %ticket_id, removed, "dirty flags cleared for retry");
        }
        Ok(())
    }

    /// Classify hosts as faulty (ticket-driven).
    pub async fn mark_fault(
        &self,
        hosts: &[Host],
        ticket_id: Option<Uuid>,
        operator: &str,
    ) -> Result<(), PoolError> {
        for host in hosts {
            self.services
                .store
                .upsert_pool_record(PooledMachine::new(host.clone(), MachinePool::Fault, ticket_id))
                .await?;
            self.log_event(host, MachineEventType::ToFault, ticket_id, operator)
                .await?;
        }
        Ok(())
    }

    /// Import hosts into the free pool. Tracked only in the event log
    /// until something classifies them.
    pub async fn import(&self, hosts: &[Host], operator: &str) -> Result<(), PoolError> {
        self.services.resources.import(hosts).await?;
        for host in hosts {
            self.log_event(host, MachineEventType::ImportResource, None, operator)
                .await?;
        }
        Ok(())
    }

    /// Roll back an import that never should have happened.
    pub async fn undo_import(&self, hosts: &[Host], operator: &str) -> Result<(), PoolError> {
        for host in hosts {
            self.log_event(host, MachineEventType::UndoImport, None, operator)
                .await?;
        }
        Ok(())
    }

    /// Hosts eligible to go back to the free pool: those whose latest
    /// event is an import (they never left the free pool).
    pub async fn hosts_can_return(&self, hosts: &[Host]) -> Result<Vec<Host>, PoolError> {
        let mut eligible = Vec::new();
        for host in hosts {
            let latest = self.services.store.latest_machine_event(host.host_id).await?;
            if matches!(
                latest,
                Some(MachineEvent {
                    event: MachineEventType::ImportResource,
                    ..
                })
            ) {
                eligible.push(host.clone());
            }
        }
        Ok(eligible)
    }

    /// Return eligible hosts to the free pool; terminal for tracking.
    pub async fn return_to_resource(
        &self,
        hosts: &[Host],
        operator: &str,
    ) -> Result<Vec<Host>, PoolError> {
        let eligible = self.hosts_can_return(hosts).await?;
        if eligible.is_empty() {
            return Ok(eligible);
        }
        self.services.resources.return_hosts(&eligible).await?;
        for host in &eligible {
            self.services.store.remove_pool_record(host.host_id).await?;
            self.log_event(host, MachineEventType::ReturnResource, None, operator)
                .await?;
        }
        Ok(eligible)
    }

    /// Flow-manager hook, called on every inner-flow status transition.
    ///
    /// The origin check fires before the target check: a retry of a
    /// failed deploy reuses the same host set, so previously-flagged
    /// hosts are un-flagged before any fresh flagging happens.
    pub async fn on_inner_flow_transition(
        &self,
        ticket: &Ticket,
        flow: &Flow,
        origin: FlowStatus,
        target: FlowStatus,
    ) -> Result<(), PoolError> {
        if !ticket.ticket_type.is_apply() {
            return Ok(());
        }

        if origin == FlowStatus::Failed && target != FlowStatus::Failed {
            self.unmark_dirty(ticket.id).await?;
        }
        if target == FlowStatus::Failed {
            let hosts = requested_hosts(flow);
            if !hosts.is_empty() {
                self.mark_dirty(&hosts, ticket.id).await?;
            }
        }
        Ok(())
    }
}

/// Hosts a ticket's inner flow was given to work on: the ones the
/// resource-apply stage wired into the flow's details.
fn requested_hosts(flow: &Flow) -> Vec<Host> {
    flow.details
        .get("hosts")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_else(|| ResourceApplyStage::allocated_hosts(flow))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_services;
    use crate::models::TicketType;

    fn hosts() -> Vec<Host> {
        vec![Host::new(1, "10.0.0.1"), Host::new(2, "10.0.0.2")]
    }

    #[tokio::test]
    async fn fault_to_recycle_is_legal_and_logged() {
        let (services, _handles) = test_services();
        let pool = MachinePoolManager::new(services.clone());

        pool.mark_fault(&hosts(), None, "dba").await.unwrap();
        pool.transfer(&hosts(), MachinePool::Fault, MachinePool::Recycle, None, "dba")
            .await
            .unwrap();

        let record = services.store.pool_record(1).await.unwrap().unwrap();
        assert_eq!(record.pool, MachinePool::Recycle);
        let latest = services.store.latest_machine_event(1).await.unwrap().unwrap();
        assert_eq!(latest.event, MachineEventType::ToRecycle);
    }

    #[tokio::test]
    async fn illegal_transfers_are_rejected() {
        let (services, _handles) = test_services();
        let pool = MachinePoolManager::new(services.clone());

        pool.mark_fault(&hosts(), None, "dba").await.unwrap();
        let err = pool
            .transfer(&hosts(), MachinePool::Recycle, MachinePool::Fault, None, "dba")
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::TransferNotAllowed { .. }));

        let err = pool
            .transfer(&hosts(), MachinePool::Dirty, MachinePool::Recycled, None, "dba")
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::TransferNotAllowed { .. }));
    }

    #[tokio::test]
    async fn recycled_hosts_leave_tracking_via_cmdb() {
        let (services, handles) = test_services();
        let pool = MachinePoolManager::new(services.clone());

        pool.mark_fault(&hosts(), None, "dba").await.unwrap();
        pool.transfer(&hosts(), MachinePool::Fault, MachinePool::Recycle, None, "dba")
            .await
            .unwrap();
        pool.transfer(&hosts(), MachinePool::Recycle, MachinePool::Recycled, None, "dba")
            .await
            .unwrap();

        assert!(services.store.pool_record(1).await.unwrap().is_none());
        assert_eq!(handles.cmdb.recycled_hosts().len(), 2);
        let latest = services.store.latest_machine_event(1).await.unwrap().unwrap();
        assert_eq!(latest.event, MachineEventType::Recycled);
    }

    #[tokio::test]
    async fn dirty_flagging_skips_the_event_log() {
        let (services, _handles) = test_services();
        let pool = MachinePoolManager::new(services.clone());
        let ticket_id = Uuid::new_v4();

        pool.mark_dirty(&hosts(), ticket_id).await.unwrap();

        let record = services.store.pool_record(1).await.unwrap().unwrap();
        assert_eq!(record.pool, MachinePool::Dirty);
        assert!(services.store.latest_machine_event(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn only_never_used_hosts_can_return() {
        let (services, _handles) = test_services();
        let pool = MachinePoolManager::new(services.clone());
        let fresh = Host::new(10, "10.0.0.10");
        let used = Host::new(11, "10.0.0.11");

        pool.import(&[fresh.clone(), used.clone()], "ops").await.unwrap();
        services
            .store
            .append_machine_event(MachineEvent::new(
                used.clone(),
                MachineEventType::ApplyResource,
                None,
                "ops",
            ))
            .await
            .unwrap();

        let eligible = pool
            .hosts_can_return(&[fresh.clone(), used.clone()])
            .await
            .unwrap();
        assert_eq!(eligible, vec![fresh]);
    }

    #[tokio::test]
    async fn return_to_resource_filters_and_untracks() {
        let (services, handles) = test_services();
        let pool = MachinePoolManager::new(services.clone());
        let fresh = Host::new(20, "10.0.0.20");
        let used = Host::new(21, "10.0.0.21");

        pool.import(&[fresh.clone(), used.clone()], "ops").await.unwrap();
        services
            .store
            .append_machine_event(MachineEvent::new(
                used.clone(),
                MachineEventType::ApplyResource,
                None,
                "ops",
            ))
            .await
            .unwrap();

        let returned = pool
            .return_to_resource(&[fresh.clone(), used.clone()], "ops")
            .await
            .unwrap();
        assert_eq!(returned, vec![fresh.clone()]);
        assert!(handles.resources.returned_hosts().contains(&fresh));
        let latest = services
            .store
            .latest_machine_event(fresh.host_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.event, MachineEventType::ReturnResource);
    }

    #[tokio::test]
    async fn retry_unflags_before_fresh_flagging() {
        let (services, _handles) = test_services();
        let pool = MachinePoolManager::new(services.clone());
        let ticket = Ticket::new(
            1,
            TicketType::ClusterApply,
            "alice",
            "mysql",
            serde_json::json!({}),
        );
        let flow = Flow::new(
            ticket.id,
            crate::models::FlowType::InnerFlow,
            2,
            serde_json::json!({ "hosts": hosts() }),
        );

        // First failure flags the hosts
        pool.on_inner_flow_transition(&ticket, &flow, FlowStatus::Running, FlowStatus::Failed)
            .await
            .unwrap();
        assert!(services.store.pool_record(1).await.unwrap().is_some());

        // Retry leaving the failed state clears them
        pool.on_inner_flow_transition(&ticket, &flow, FlowStatus::Failed, FlowStatus::Running)
            .await
            .unwrap();
        assert!(services.store.pool_record(1).await.unwrap().is_none());
    }
}
