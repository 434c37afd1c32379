//! DBA directory: who is responsible for a business + database group.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// DBA assignments for one business + group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbaGroup {
    pub primary: Vec<String>,
    pub secondary: Vec<String>,
    pub others: Vec<String>,
    /// Business-configured assistance list (informational helpers)
    pub assistance: Vec<String>,
}

#[async_trait]
pub trait DbaDirectory: Send + Sync {
    /// DBA assignments for a business and database group.
    async fn dba_group(&self, biz_id: u64, group: &str) -> DbaGroup;

    /// Designated external approvers for a business, in approval order.
    async fn approvers(&self, biz_id: u64) -> Vec<String>;
}
