//! External collaborator abstractions
//!
//! Trait-based seams for every system the core calls out to — approval
//! service, task-graph engine, resource pool, CMDB, notifications, DBA
//! directory — enabling testable code through dependency injection.
//! In-memory implementations back both the tests and the local runner.

pub mod approval;
pub mod cmdb;
pub mod dba;
pub mod gate;
pub mod inmem;
pub mod notify;
pub mod resource;
pub mod taskgraph;

use thiserror::Error;

pub use approval::{ApprovalLogEntry, ApprovalService, ApprovalSnapshot, ApprovalState};
pub use cmdb::CmdbClient;
pub use dba::{DbaDirectory, DbaGroup};
pub use gate::RateLimitedApproval;
pub use inmem::{
    InMemoryApproval, InMemoryCmdb, InMemoryResourcePool, InMemoryTaskGraph, LogNotifier,
    RecordingNotifier, StaticDbaDirectory,
};
pub use notify::{Notifier, NullNotifier};
pub use resource::{ResourcePool, ResourceRequest};
pub use taskgraph::{TaskGraphEngine, TaskGraphState, FAILED_STATES};

/// Errors surfaced by external collaborators.
///
/// The transient variant is the one status polling swallows: an upstream
/// hiccup must never regress an already-observed state.
#[derive(Debug, Error)]
pub enum ExternalError {
    #[error("{service} rejected the request: {reason}")]
    Rejected {
        service: &'static str,
        reason: String,
    },
    #[error("transient failure talking to {service}: {reason}")]
    Transient {
        service: &'static str,
        reason: String,
    },
    #[error("resource pool cannot satisfy the request: {0}")]
    CapacityShortage(String),
    #[error("{service} has no record of {key}")]
    UnknownKey { service: &'static str, key: String },
}

impl ExternalError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ExternalError::Transient { .. })
    }
}
