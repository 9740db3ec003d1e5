//! Signal bus - synchronous pub/sub for completion signals.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::CompletionSignal;
use crate::sync::lock;

/// Events a handler can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalEvent {
    Completion,
}

impl SignalEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completion => "completion",
        }
    }
}

/// Handle returned by [`SignalBus::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

pub type SignalHandler = Arc<dyn Fn(&CompletionSignal) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    event: SignalEvent,
    handler: SignalHandler,
}

/// Observer list guarded by a mutex.
///
/// `emit` snapshots the handler list before dispatch, so handlers may
/// subscribe or unsubscribe while being called. A panicking handler is
/// logged and does not stop delivery to the rest.
#[derive(Default)]
pub struct SignalBus {
    subscriptions: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl fmt::Debug for SignalBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalBus")
            .field("subscriptions", &lock(&self.subscriptions).len())
            .finish()
    }
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, event: SignalEvent, handler: F) -> SubscriptionId
    where
        F: Fn(&CompletionSignal) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.subscriptions).push(Subscription {
            id,
            event,
            handler: Arc::new(handler),
        });
        id
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = lock(&self.subscriptions);
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    pub fn handler_count(&self, event: SignalEvent) -> usize {
        lock(&self.subscriptions)
            .iter()
            .filter(|s| s.event == event)
            .count()
    }

    /// Deliver a completion signal to every completion handler, in
    /// registration order. Returns how many handlers returned normally.
    pub fn emit(&self, signal: &CompletionSignal) -> usize {
        let handlers: Vec<SignalHandler> = lock(&self.subscriptions)
            .iter()
            .filter(|s| s.event == SignalEvent::Completion)
            .map(|s| Arc::clone(&s.handler))
            .collect();

        tracing::debug!(
            operation_id = %signal.operation_id,
            status = %signal.status,
            handlers = handlers.len(),
            "Emitting completion signal"
        );

        let mut delivered = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(signal))) {
                Ok(()) => delivered += 1,
                Err(_) => tracing::warn!(
                    operation_id = %signal.operation_id,
                    event = SignalEvent::Completion.as_str(),
                    "Signal handler panicked"
                ),
            }
        }
        delivered
    }
}
