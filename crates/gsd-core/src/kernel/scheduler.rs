//! Scheduler - priority ordering over the engine registry.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A registered engine and its scheduling state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineRegistration {
    pub name: String,
    pub priority: i32,
    #[serde(default)]
    pub asleep: bool,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("unknown engine '{0}'")]
    UnknownEngine(String),

    #[error("engine '{0}' is already registered")]
    DuplicateEngine(String),
}

/// Engine registry with sleep/wake state.
///
/// Registration order is kept so engines of equal priority schedule in the
/// order they were registered.
#[derive(Debug, Default)]
pub struct Scheduler {
    engines: Vec<EngineRegistration>,
    index: HashMap<String, usize>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an awake engine
    pub fn register(
        &mut self,
        name: impl Into<String>,
        priority: i32,
    ) -> Result<(), SchedulerError> {
        self.insert(EngineRegistration {
            name: name.into(),
            priority,
            asleep: false,
        })
    }

    /// Register an engine that starts asleep
    pub fn register_asleep(
        &mut self,
        name: impl Into<String>,
        priority: i32,
    ) -> Result<(), SchedulerError> {
        self.insert(EngineRegistration {
            name: name.into(),
            priority,
            asleep: true,
        })
    }

    pub fn insert(&mut self, engine: EngineRegistration) -> Result<(), SchedulerError> {
        if self.index.contains_key(&engine.name) {
            return Err(SchedulerError::DuplicateEngine(engine.name));
        }
        self.index.insert(engine.name.clone(), self.engines.len());
        self.engines.push(engine);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&EngineRegistration> {
        self.index.get(name).map(|&i| &self.engines[i])
    }

    pub fn is_asleep(&self, name: &str) -> Result<bool, SchedulerError> {
        self.get(name)
            .map(|e| e.asleep)
            .ok_or_else(|| SchedulerError::UnknownEngine(name.to_string()))
    }

    /// All engines in registration order
    pub fn engines(&self) -> &[EngineRegistration] {
        &self.engines
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Names of awake engines, highest priority first.
    pub fn get_scheduled_order(&self) -> Vec<String> {
        let mut awake: Vec<&EngineRegistration> =
            self.engines.iter().filter(|e| !e.asleep).collect();
        // sort_by is stable, ties keep registration order
        awake.sort_by(|a, b| b.priority.cmp(&a.priority));
        awake.into_iter().map(|e| e.name.clone()).collect()
    }

    /// Put an engine to sleep. Returns whether its state changed.
    pub fn sleep(&mut self, name: &str) -> Result<bool, SchedulerError> {
        self.set_asleep(name, true)
    }

    /// Wake an engine. Returns whether its state changed.
    pub fn wake(&mut self, name: &str) -> Result<bool, SchedulerError> {
        self.set_asleep(name, false)
    }

    fn set_asleep(&mut self, name: &str, asleep: bool) -> Result<bool, SchedulerError> {
        let idx = *self
            .index
            .get(name)
            .ok_or_else(|| SchedulerError::UnknownEngine(name.to_string()))?;
        let engine = &mut self.engines[idx];
        let changed = engine.asleep != asleep;
        engine.asleep = asleep;
        Ok(changed)
    }
}
