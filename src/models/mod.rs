// Domain records shared across the orchestration engine

pub mod flow;
pub mod machine;
pub mod ticket;
pub mod todo;

pub use flow::{Flow, FlowStatus, FlowType};
pub use machine::{Host, MachineEvent, MachineEventType, MachinePool, PooledMachine};
pub use ticket::{Ticket, TicketStatus, TicketType};
pub use todo::{Todo, TodoAction, TodoHistory, TodoStatus, TodoType};
