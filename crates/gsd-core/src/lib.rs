//! GSD Core - virtual kernel for the GSD orchestration layer
//!
//! This crate provides the tick-driven scheduler that governs named
//! engines, the typed message protocol routed between their mailboxes,
//! the shared token budget, out-of-process script offload with timeouts,
//! and the feedback loop that demotes operations whose output drifts.

pub mod config;
pub mod feedback;
pub mod kernel;
pub mod offload;
pub mod protocol;
pub mod store;

mod sync;

pub use config::KernelConfig;
pub use feedback::{DemotionDecision, DriftMonitor, FeedbackBridge, FeedbackEntry};
pub use kernel::{BudgetManager, Kernel, KernelError, KernelState, Scheduler};
pub use offload::{
    execute_offload_op, CompletionSignal, OffloadExecutor, OffloadOperation, OffloadResult,
    SignalBus,
};
pub use protocol::{create_message, create_reply, KernelMessage, MessagePayload, MessageType};
pub use store::{JsonlPatternStore, MemoryPatternStore, PatternStore};
