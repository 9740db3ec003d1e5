//! Feedback bridge - persists completion signals as feedback entries.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::offload::{CompletionSignal, SignalBus, SignalEvent, SignalStatus, SubscriptionId};
use crate::store::{PatternStore, FEEDBACK_CATEGORY};
use crate::sync::lock;

/// Persisted record of one observed completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackEntry {
    pub operation_id: String,
    pub status: SignalStatus,
    pub exit_code: i32,
    pub duration_ms: u64,
    pub stdout_hash: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FeedbackEntry {
    /// An explicit error message marks the entry `error` whatever the exit code.
    pub fn from_signal(signal: &CompletionSignal) -> Self {
        let status = if signal.error.is_some() {
            SignalStatus::Error
        } else {
            signal.status
        };
        Self {
            operation_id: signal.operation_id.clone(),
            status,
            exit_code: signal.result.exit_code,
            duration_ms: signal.result.duration_ms,
            stdout_hash: hash_output(&signal.result.stdout),
            timestamp: Utc::now(),
            error: signal.error.clone(),
        }
    }
}

/// SHA-256 of the output, hex encoded.
pub fn hash_output(output: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(output.as_bytes());
    hex::encode(hasher.finalize())
}

/// Subscribes to completion signals while started and appends one feedback
/// entry per signal. Signals arriving while stopped are not buffered.
pub struct FeedbackBridge {
    bus: Arc<SignalBus>,
    store: Arc<dyn PatternStore>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl FeedbackBridge {
    pub fn new(bus: Arc<SignalBus>, store: Arc<dyn PatternStore>) -> Self {
        Self {
            bus,
            store,
            subscription: Mutex::new(None),
        }
    }

    /// Start capturing. Returns false if already started.
    pub fn start(&self) -> bool {
        let mut subscription = lock(&self.subscription);
        if subscription.is_some() {
            return false;
        }

        let store = Arc::clone(&self.store);
        let id = self.bus.on(SignalEvent::Completion, move |signal| {
            capture(store.as_ref(), signal);
        });
        *subscription = Some(id);

        tracing::info!("Feedback bridge started");
        true
    }

    /// Stop capturing. Returns false if not started.
    pub fn stop(&self) -> bool {
        let Some(id) = lock(&self.subscription).take() else {
            return false;
        };
        self.bus.off(id);
        tracing::info!("Feedback bridge stopped");
        true
    }

    pub fn is_active(&self) -> bool {
        lock(&self.subscription).is_some()
    }
}

impl Drop for FeedbackBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture(store: &dyn PatternStore, signal: &CompletionSignal) {
    let entry = FeedbackEntry::from_signal(signal);
    let data = match serde_json::to_value(&entry) {
        Ok(data) => data,
        Err(e) => {
            tracing::warn!(
                operation_id = %entry.operation_id,
                error = %e,
                "Failed to encode feedback entry"
            );
            return;
        }
    };

    if let Err(e) = store.append(FEEDBACK_CATEGORY, data) {
        tracing::warn!(
            operation_id = %entry.operation_id,
            error = %e,
            "Failed to persist feedback entry"
        );
    }
}
