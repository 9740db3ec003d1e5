//! Budget manager - per-engine token ledger over a shared pool.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// How the kernel treats spends beyond the shared pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetMode {
    /// Spends are always recorded; callers read `remaining` to self-regulate.
    #[default]
    Advisory,
    /// Spends that would overdraw the pool are rejected.
    Enforced,
}

/// Budget view for a single engine.
///
/// `remaining` is pool-wide and goes negative once the pool is overdrawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetStatus {
    pub spent: u64,
    pub remaining: i64,
    pub limit: u64,
}

/// A spend refused under [`BudgetMode::Enforced`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overdraft {
    pub engine: String,
    pub attempted: u64,
    pub remaining: i64,
}

#[derive(Debug, Default)]
pub struct BudgetManager {
    total_budget: u64,
    spent: HashMap<String, u64>,
    global_spent: u64,
}

impl BudgetManager {
    pub fn new(total_budget: u64) -> Self {
        Self {
            total_budget,
            spent: HashMap::new(),
            global_spent: 0,
        }
    }

    pub fn total_budget(&self) -> u64 {
        self.total_budget
    }

    pub fn total_spent(&self) -> u64 {
        self.global_spent
    }

    pub fn remaining(&self) -> i64 {
        signed(self.total_budget).saturating_sub(signed(self.global_spent))
    }

    /// Record a spend. Never rejects; the ledger may overdraw the pool.
    pub fn spend(&mut self, engine: &str, amount: u64) -> BudgetStatus {
        let entry = self.spent.entry(engine.to_string()).or_insert(0);
        *entry = entry.saturating_add(amount);
        self.global_spent = self.global_spent.saturating_add(amount);

        tracing::debug!(
            engine = %engine,
            amount,
            global_spent = self.global_spent,
            "Budget spend recorded"
        );

        self.get_status(engine)
    }

    /// Record a spend only if it fits in the remaining pool.
    pub fn try_spend(&mut self, engine: &str, amount: u64) -> Result<BudgetStatus, Overdraft> {
        let remaining = self.remaining();
        if signed(amount) > remaining {
            return Err(Overdraft {
                engine: engine.to_string(),
                attempted: amount,
                remaining,
            });
        }
        Ok(self.spend(engine, amount))
    }

    /// Status for an engine. Engines that never spent report zero.
    pub fn get_status(&self, engine: &str) -> BudgetStatus {
        BudgetStatus {
            spent: self.spent.get(engine).copied().unwrap_or(0),
            remaining: self.remaining(),
            limit: self.total_budget,
        }
    }

    /// Status of every engine that has spent anything
    pub fn snapshot(&self) -> BTreeMap<String, BudgetStatus> {
        self.spent
            .keys()
            .map(|engine| (engine.clone(), self.get_status(engine)))
            .collect()
    }
}

fn signed(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
