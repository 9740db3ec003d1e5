//! Drift monitor - per-operation consecutive mismatch tracking and demotion.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::FeedbackEntry;
use crate::config::DriftConfig;
use crate::store::PatternStore;

/// One hash comparison for an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftEvent {
    pub operation_id: String,
    pub matched: bool,
    pub actual_hash: String,
    pub expected_hash: String,
    /// Counter value after this event
    pub consecutive_mismatches: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DemotionDecision {
    pub demoted: bool,
    pub consecutive_mismatches: u32,
    pub reason: String,
    /// Events of the current unbroken mismatch streak
    pub events: Vec<DriftEvent>,
}

impl DemotionDecision {
    fn disabled() -> Self {
        Self {
            demoted: false,
            consecutive_mismatches: 0,
            reason: "disabled".to_string(),
            events: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Streak {
    mismatches: u32,
    events: Vec<DriftEvent>,
}

impl Streak {
    fn record(&mut self, event: DriftEvent) {
        if event.matched {
            self.mismatches = 0;
            self.events.clear();
        } else {
            self.mismatches = self.mismatches.saturating_add(1);
            self.events.push(event);
        }
    }
}

/// Tracks consecutive hash mismatches per operation.
///
/// Every event is appended to the store; construction replays the stored
/// events so counters survive restarts. Demotion does not reset a counter,
/// only a later match does.
pub struct DriftMonitor {
    config: DriftConfig,
    store: Arc<dyn PatternStore>,
    streaks: HashMap<String, Streak>,
}

impl DriftMonitor {
    pub fn new(store: Arc<dyn PatternStore>, config: DriftConfig) -> Self {
        let mut monitor = Self {
            config,
            store,
            streaks: HashMap::new(),
        };
        if monitor.config.enabled {
            monitor.replay();
        }
        monitor
    }

    pub fn config(&self) -> &DriftConfig {
        &self.config
    }

    fn sensitivity(&self) -> u32 {
        self.config.sensitivity.max(1)
    }

    fn replay(&mut self) {
        let records = match self.store.read(&self.config.category) {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(
                    category = %self.config.category,
                    error = %e,
                    "Failed to read drift log, starting with empty counters"
                );
                return;
            }
        };

        let mut replayed = 0usize;
        let mut skipped = 0usize;
        for record in records {
            match serde_json::from_value::<DriftEvent>(record.data) {
                Ok(event) => {
                    self.streaks
                        .entry(event.operation_id.clone())
                        .or_default()
                        .record(event);
                    replayed += 1;
                }
                Err(_) => skipped += 1,
            }
        }

        tracing::debug!(
            category = %self.config.category,
            replayed,
            skipped,
            operations = self.streaks.len(),
            "Drift counters restored"
        );
    }

    /// Compare an operation's actual output hash against the expected one.
    pub fn check(
        &mut self,
        operation_id: &str,
        actual_hash: &str,
        expected_hash: &str,
    ) -> DemotionDecision {
        if !self.config.enabled {
            return DemotionDecision::disabled();
        }

        let sensitivity = self.sensitivity();
        let matched = actual_hash == expected_hash;
        let streak = self.streaks.entry(operation_id.to_string()).or_default();
        let consecutive_mismatches = if matched {
            0
        } else {
            streak.mismatches.saturating_add(1)
        };

        let event = DriftEvent {
            operation_id: operation_id.to_string(),
            matched,
            actual_hash: actual_hash.to_string(),
            expected_hash: expected_hash.to_string(),
            consecutive_mismatches,
            timestamp: Utc::now(),
        };
        streak.record(event.clone());
        let events = streak.events.clone();
        self.persist(&event);

        if matched {
            return DemotionDecision {
                demoted: false,
                consecutive_mismatches: 0,
                reason: "output hash matched".to_string(),
                events,
            };
        }

        if consecutive_mismatches >= sensitivity {
            tracing::info!(
                operation_id = %operation_id,
                consecutive_mismatches,
                sensitivity,
                "Operation demoted for drift"
            );
            DemotionDecision {
                demoted: true,
                consecutive_mismatches,
                reason: format!(
                    "{} consecutive mismatches reached threshold {}",
                    consecutive_mismatches, sensitivity
                ),
                events,
            }
        } else {
            DemotionDecision {
                demoted: false,
                consecutive_mismatches,
                reason: format!(
                    "{} of {} consecutive mismatches, below threshold",
                    consecutive_mismatches, sensitivity
                ),
                events,
            }
        }
    }

    /// Check a captured feedback entry against a known-good hash.
    pub fn check_feedback(
        &mut self,
        entry: &FeedbackEntry,
        expected_hash: &str,
    ) -> DemotionDecision {
        self.check(&entry.operation_id, &entry.stdout_hash, expected_hash)
    }

    pub fn consecutive_mismatches(&self, operation_id: &str) -> u32 {
        self.streaks
            .get(operation_id)
            .map(|s| s.mismatches)
            .unwrap_or(0)
    }

    pub fn is_demoted(&self, operation_id: &str) -> bool {
        self.config.enabled && self.consecutive_mismatches(operation_id) >= self.sensitivity()
    }

    /// Operations currently at or above the demotion threshold, sorted.
    pub fn demoted_operations(&self) -> Vec<String> {
        if !self.config.enabled {
            return Vec::new();
        }
        let sensitivity = self.sensitivity();
        let mut demoted: Vec<String> = self
            .streaks
            .iter()
            .filter(|(_, s)| s.mismatches >= sensitivity)
            .map(|(op, _)| op.clone())
            .collect();
        demoted.sort();
        demoted
    }

    fn persist(&self, event: &DriftEvent) {
        let result = serde_json::to_value(event)
            .map_err(|e| e.to_string())
            .and_then(|data| {
                self.store
                    .append(&self.config.category, data)
                    .map_err(|e| e.to_string())
            });
        if let Err(error) = result {
            tracing::warn!(
                operation_id = %event.operation_id,
                error = %error,
                "Failed to persist drift event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryPatternStore;

    fn monitor(store: &Arc<MemoryPatternStore>) -> DriftMonitor {
        DriftMonitor::new(store.clone(), DriftConfig::default())
    }

    #[test]
    fn match_resets_counter() {
        let store = Arc::new(MemoryPatternStore::new());
        let mut m = monitor(&store);
        m.check("op", "a", "b");
        m.check("op", "a", "b");
        let decision = m.check("op", "b", "b");
        assert!(!decision.demoted);
        assert_eq!(decision.consecutive_mismatches, 0);
        assert!(decision.events.is_empty());
        assert_eq!(m.consecutive_mismatches("op"), 0);
    }

    #[test]
    fn demotes_at_sensitivity_and_keeps_counting() {
        let store = Arc::new(MemoryPatternStore::new());
        let mut m = monitor(&store);
        assert!(!m.check("op", "x1", "e").demoted);
        let second = m.check("op", "x2", "e");
        assert!(!second.demoted);
        assert_eq!(second.events.len(), 2);

        let third = m.check("op", "x3", "e");
        assert!(third.demoted);
        assert_eq!(third.consecutive_mismatches, 3);
        assert_eq!(third.events.len(), 3);
        assert!(third.reason.contains("threshold"));

        let fourth = m.check("op", "x4", "e");
        assert!(fourth.demoted);
        assert_eq!(fourth.consecutive_mismatches, 4);
        assert_eq!(m.demoted_operations(), vec!["op"]);
    }

    #[test]
    fn operations_are_independent() {
        let store = Arc::new(MemoryPatternStore::new());
        let mut m = monitor(&store);
        m.check("a", "1", "2");
        m.check("a", "1", "2");
        m.check("b", "1", "1");
        m.check("b", "1", "2");
        assert_eq!(m.consecutive_mismatches("a"), 2);
        assert_eq!(m.consecutive_mismatches("b"), 1);
        assert_eq!(m.consecutive_mismatches("c"), 0);
    }

    #[test]
    fn disabled_monitor_keeps_no_state() {
        let store = Arc::new(MemoryPatternStore::new());
        let config = DriftConfig {
            enabled: false,
            ..DriftConfig::default()
        };
        let mut m = DriftMonitor::new(store.clone(), config);
        for _ in 0..5 {
            let decision = m.check("op", "a", "b");
            assert_eq!(decision, DemotionDecision::disabled());
        }
        assert!(store.is_empty());
        assert!(!m.is_demoted("op"));
    }

    #[test]
    fn custom_sensitivity() {
        let store = Arc::new(MemoryPatternStore::new());
        let config = DriftConfig {
            sensitivity: 1,
            ..DriftConfig::default()
        };
        let mut m = DriftMonitor::new(store, config);
        assert!(m.check("op", "a", "b").demoted);
    }

    #[test]
    fn unavailable_store_does_not_break_checks() {
        let store = Arc::new(MemoryPatternStore::new());
        store.set_unavailable(true);
        let mut m = monitor(&store);
        m.check("op", "a", "b");
        m.check("op", "a", "b");
        assert!(m.check("op", "a", "b").demoted);
    }
}
