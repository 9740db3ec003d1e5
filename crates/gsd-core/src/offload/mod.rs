//! Offload - out-of-process script execution and completion signals.

mod executor;
mod signal;
mod types;

pub use executor::{execute_offload_op, OffloadError, OffloadExecutor};
pub use signal::{SignalBus, SignalEvent, SignalHandler, SubscriptionId};
pub use types::{
    CompletionSignal, OffloadOperation, OffloadResult, ScriptType, SignalStatus,
    SENTINEL_EXIT_CODE,
};
