//! Feedback - closes the loop from offload execution back to trust decisions.

mod bridge;
mod drift;

pub use bridge::{hash_output, FeedbackBridge, FeedbackEntry};
pub use drift::{DemotionDecision, DriftEvent, DriftMonitor};
