//! Resource procurement service contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::external::ExternalError;
use crate::models::Host;

/// One allocation request against the free pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub biz_id: u64,
    pub group: String,
    pub count: u32,
}

#[async_trait]
pub trait ResourcePool: Send + Sync {
    /// Allocate hosts from the free pool. Fails with
    /// [`ExternalError::CapacityShortage`] when the pool runs short.
    async fn apply(&self, request: &ResourceRequest) -> Result<Vec<Host>, ExternalError>;

    /// Return hosts to the free pool.
    async fn return_hosts(&self, hosts: &[Host]) -> Result<(), ExternalError>;

    /// Import hosts into the free pool from outside the platform.
    async fn import(&self, hosts: &[Host]) -> Result<(), ExternalError>;
}
