//! JSONL directory store: one `<category>.jsonl` file per category.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use super::{validate_category, PatternRecord, PatternStore, StoreError};
use crate::sync::lock;

/// Appends are serialized per category file.
#[derive(Debug)]
pub struct JsonlPatternStore {
    root: PathBuf,
    file_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl JsonlPatternStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            file_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, category: &str) -> PathBuf {
        self.root.join(format!("{category}.jsonl"))
    }

    fn file_lock(&self, category: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            lock(&self.file_locks)
                .entry(category.to_string())
                .or_default(),
        )
    }
}

impl PatternStore for JsonlPatternStore {
    fn append(&self, category: &str, data: Value) -> Result<(), StoreError> {
        validate_category(category)?;
        let record = PatternRecord::new(category, data);
        let line = serde_json::to_string(&record)?;

        let file_lock = self.file_lock(category);
        let _guard = lock(&file_lock);

        std::fs::create_dir_all(&self.root)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(category))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    fn read(&self, category: &str) -> Result<Vec<PatternRecord>, StoreError> {
        validate_category(category)?;
        let path = self.path_for(category);

        let file_lock = self.file_lock(category);
        let _guard = lock(&file_lock);

        let file = match std::fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        let mut skipped = 0usize;
        for line in BufReader::new(file).lines() {
            let Ok(line) = line else {
                skipped += 1;
                continue;
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<PatternRecord>(&line) {
                Ok(record) => records.push(record),
                Err(_) => skipped += 1,
            }
        }

        if skipped > 0 {
            tracing::warn!(
                category = %category,
                path = %path.display(),
                skipped,
                "Skipped unreadable pattern records"
            );
        }

        Ok(records)
    }
}
