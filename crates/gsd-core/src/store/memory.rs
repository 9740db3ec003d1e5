//! In-process pattern store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde_json::Value;

use super::{validate_category, PatternRecord, PatternStore, StoreError};
use crate::sync::lock;

#[derive(Debug, Default)]
pub struct MemoryPatternStore {
    records: Mutex<Vec<PatternRecord>>,
    unavailable: AtomicBool,
}

impl MemoryPatternStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail, as a store that went away would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.records).is_empty()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store marked unavailable".into()))
        } else {
            Ok(())
        }
    }
}

impl PatternStore for MemoryPatternStore {
    fn append(&self, category: &str, data: Value) -> Result<(), StoreError> {
        validate_category(category)?;
        self.check_available()?;
        lock(&self.records).push(PatternRecord::new(category, data));
        Ok(())
    }

    fn read(&self, category: &str) -> Result<Vec<PatternRecord>, StoreError> {
        validate_category(category)?;
        self.check_available()?;
        Ok(lock(&self.records)
            .iter()
            .filter(|r| r.category == category)
            .cloned()
            .collect())
    }
}
