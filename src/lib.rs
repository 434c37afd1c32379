// Fleetflow Library - Database Fleet Ticket Orchestration
// This exposes the core components for testing and integration

pub mod builders;
pub mod config;
pub mod coordinator;
pub mod external;
pub mod manager;
pub mod models;
pub mod pool;
pub mod services;
pub mod stages;
pub mod store;
pub mod telemetry;
pub mod test_support;
pub mod todos;

// Re-export key types for easy access
pub use builders::{create_ticket, flow_sequence, TicketRequest};
pub use config::FleetflowConfig;
pub use coordinator::{CoordinatorConfig, FlowCoordinator};
pub use external::{
    ApprovalService, CmdbClient, DbaDirectory, ExternalError, Notifier, RateLimitedApproval,
    ResourcePool, TaskGraphEngine,
};
pub use manager::{aggregate_status, running_ticket_status, ManagerError, TicketFlowManager};
pub use models::{
    Flow, FlowStatus, FlowType, Host, MachineEvent, MachineEventType, MachinePool, PooledMachine,
    Ticket, TicketStatus, TicketType, Todo, TodoAction, TodoStatus, TodoType,
};
pub use pool::{MachinePoolManager, PoolError};
pub use services::Services;
pub use stages::{FlowStage, StageError, StatusProbe, TicketStage};
pub use store::{InMemoryStore, StoreError, TicketStore};
pub use telemetry::{generate_correlation_id, init_telemetry, shutdown_telemetry};
pub use todos::{TodoError, TodoManager};
