//! Kernel - engine scheduling, mailboxes and the shared token budget.

mod budget;
mod mailbox;
mod runtime;
mod scheduler;

pub use budget::{BudgetManager, BudgetMode, BudgetStatus, Overdraft};
pub use mailbox::Mailbox;
pub use runtime::{EngineSnapshot, Kernel, KernelError, KernelSnapshot, KernelState, TickReport};
pub use scheduler::{EngineRegistration, Scheduler, SchedulerError};
