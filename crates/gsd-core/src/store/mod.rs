//! Pattern store - append-only records grouped by category.
//!
//! The kernel only needs `append` and `read`; the store itself belongs to
//! the host. Two implementations ship here: a JSONL directory store and an
//! in-memory store.

mod jsonl;
mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use jsonl::JsonlPatternStore;
pub use memory::MemoryPatternStore;

/// Category used for offload feedback entries.
pub const FEEDBACK_CATEGORY: &str = "feedback";

/// A single persisted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRecord {
    pub timestamp: DateTime<Utc>,
    pub category: String,
    pub data: Value,
}

impl PatternRecord {
    pub fn new(category: &str, data: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            category: category.to_string(),
            data,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid store category '{0}'")]
    InvalidCategory(String),

    #[error("pattern store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize pattern record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("pattern store unavailable: {0}")]
    Unavailable(String),
}

/// Append/read boundary to the host's pattern store.
pub trait PatternStore: Send + Sync {
    /// Append one record under a category.
    fn append(&self, category: &str, data: Value) -> Result<(), StoreError>;

    /// Every readable record of a category, oldest first.
    fn read(&self, category: &str) -> Result<Vec<PatternRecord>, StoreError>;
}

pub(crate) fn validate_category(category: &str) -> Result<(), StoreError> {
    let valid = !category.is_empty()
        && category
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidCategory(category.to_string()))
    }
}
