//! Notification dispatch contract. Fire-and-forget, keyed by ticket.

use async_trait::async_trait;
use uuid::Uuid;

use crate::external::ExternalError;
use crate::models::{TicketStatus, Todo};

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Tell the ticket's audience about a status change.
    async fn notify_status(
        &self,
        ticket_id: Uuid,
        status: TicketStatus,
    ) -> Result<(), ExternalError>;

    /// Tell the operators of a freshly created todo.
    async fn notify_todo(&self, todo: &Todo) -> Result<(), ExternalError>;
}

/// Notifier that drops everything; wired in when notifications are
/// disabled by configuration.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify_status(
        &self,
        _ticket_id: Uuid,
        _status: TicketStatus,
    ) -> Result<(), ExternalError> {
        Ok(())
    }

    async fn notify_todo(&self, _todo: &Todo) -> Result<(), ExternalError> {
        Ok(())
    }
}
