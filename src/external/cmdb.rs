//! Host topology (CMDB) service contract, consumed on terminal pool
//! transitions.

use async_trait::async_trait;

use crate::external::ExternalError;
use crate::models::Host;

#[async_trait]
pub trait CmdbClient: Send + Sync {
    /// Move hosts into the topology's recycle module.
    async fn transfer_to_recycle_module(&self, hosts: &[Host]) -> Result<(), ExternalError>;

    /// Physically recycle hosts, removing them from the business.
    async fn recycle_hosts(&self, hosts: &[Host]) -> Result<(), ExternalError>;
}
