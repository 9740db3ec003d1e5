//! Kernel - tick lifecycle over scheduler, budget and mailboxes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::budget::{BudgetManager, BudgetMode, BudgetStatus};
use super::mailbox::Mailbox;
use super::scheduler::{EngineRegistration, Scheduler, SchedulerError};
use crate::config::KernelConfig;
use crate::protocol::KernelMessage;

/// Kernel lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelState {
    #[default]
    Idle,
    Running,
    Stopped,
}

impl KernelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("kernel is not running (state: {})", .0.as_str())]
    NotRunning(KernelState),

    #[error("unknown engine '{0}'")]
    UnknownEngine(String),

    #[error("engine '{engine}' cannot spend {attempted} tokens: {remaining} remaining in pool")]
    BudgetExhausted {
        engine: String,
        attempted: u64,
        remaining: i64,
    },

    #[error("engines can only be registered while the kernel is idle")]
    RegistrationClosed,

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Result of a single tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub scheduled: Vec<String>,
    pub tick_count: u64,
}

/// Registry, schedule and budget view of one engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub engine_name: String,
    pub priority: i32,
    pub asleep: bool,
    pub pending_messages: usize,
    pub spent: u64,
    pub remaining: i64,
    pub limit: u64,
}

/// Point-in-time introspection of a kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelSnapshot {
    pub state: KernelState,
    pub tick_count: u64,
    pub engines: Vec<EngineSnapshot>,
}

/// The virtual kernel.
///
/// Owns the engine registry, one mailbox per registered engine and the
/// shared budget ledger. All operations are synchronous; callers that share
/// a kernel across threads wrap it in a mutex.
#[derive(Debug)]
pub struct Kernel {
    state: KernelState,
    tick_count: u64,
    scheduler: Scheduler,
    budget: BudgetManager,
    budget_mode: BudgetMode,
    mailboxes: HashMap<String, Mailbox>,
}

impl Kernel {
    /// Create an idle kernel with an empty registry and an advisory budget.
    pub fn new(total_budget: u64) -> Self {
        Self {
            state: KernelState::Idle,
            tick_count: 0,
            scheduler: Scheduler::new(),
            budget: BudgetManager::new(total_budget),
            budget_mode: BudgetMode::Advisory,
            mailboxes: HashMap::new(),
        }
    }

    pub fn with_budget_mode(mut self, mode: BudgetMode) -> Self {
        self.budget_mode = mode;
        self
    }

    /// Build an idle kernel with the configured budget and engine set.
    pub fn from_config(config: &KernelConfig) -> Result<Self, KernelError> {
        let mut kernel = Self::new(config.total_budget).with_budget_mode(config.budget_mode);
        for engine in &config.engines {
            kernel.insert_engine(engine.clone())?;
        }
        Ok(kernel)
    }

    pub fn register_engine(
        &mut self,
        name: impl Into<String>,
        priority: i32,
    ) -> Result<(), KernelError> {
        self.insert_engine(EngineRegistration {
            name: name.into(),
            priority,
            asleep: false,
        })
    }

    pub fn register_engine_asleep(
        &mut self,
        name: impl Into<String>,
        priority: i32,
    ) -> Result<(), KernelError> {
        self.insert_engine(EngineRegistration {
            name: name.into(),
            priority,
            asleep: true,
        })
    }

    fn insert_engine(&mut self, engine: EngineRegistration) -> Result<(), KernelError> {
        if self.state != KernelState::Idle {
            return Err(KernelError::RegistrationClosed);
        }
        let name = engine.name.clone();
        self.scheduler.insert(engine)?;
        self.mailboxes.insert(name, Mailbox::new());
        Ok(())
    }

    pub fn state(&self) -> KernelState {
        self.state
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn budget_mode(&self) -> BudgetMode {
        self.budget_mode
    }

    pub fn engines(&self) -> &[EngineRegistration] {
        self.scheduler.engines()
    }

    /// Enter the running state. No-op when already running.
    pub fn start(&mut self) -> KernelState {
        if self.state != KernelState::Running {
            tracing::info!(
                from = self.state.as_str(),
                engines = self.scheduler.len(),
                tick_count = self.tick_count,
                "Kernel starting"
            );
            self.state = KernelState::Running;
        }
        self.state
    }

    /// Leave the running state. No-op when idle or already stopped.
    pub fn stop(&mut self) -> KernelState {
        if self.state == KernelState::Running {
            tracing::info!(tick_count = self.tick_count, "Kernel stopping");
            self.state = KernelState::Stopped;
        }
        self.state
    }

    /// Advance one scheduling step.
    pub fn tick(&mut self) -> Result<TickReport, KernelError> {
        if self.state != KernelState::Running {
            return Err(KernelError::NotRunning(self.state));
        }
        self.tick_count += 1;
        let scheduled = self.scheduler.get_scheduled_order();

        tracing::debug!(
            tick = self.tick_count,
            scheduled = scheduled.len(),
            "Kernel tick"
        );

        Ok(TickReport {
            scheduled,
            tick_count: self.tick_count,
        })
    }

    /// Enqueue a message for its receiver, debiting its token cost from the sender.
    pub fn send_message(&mut self, message: KernelMessage) -> Result<(), KernelError> {
        self.require_engine(message.sender())?;
        self.require_engine(message.receiver())?;

        if message.token_cost() > 0 {
            self.debit(message.sender(), message.token_cost())?;
        }

        tracing::debug!(
            message_id = %message.id(),
            kind = %message.message_type(),
            sender = %message.sender(),
            receiver = %message.receiver(),
            token_cost = message.token_cost(),
            "Message routed"
        );

        self.mailboxes
            .entry(message.receiver().to_string())
            .or_default()
            .push(message);
        Ok(())
    }

    /// Drain an engine's mailbox. Unknown engines have nothing pending.
    pub fn receive_messages(&mut self, engine: &str) -> Vec<KernelMessage> {
        self.mailboxes
            .get_mut(engine)
            .map(Mailbox::drain)
            .unwrap_or_default()
    }

    pub fn get_pending_messages(&self, engine: &str) -> usize {
        self.mailboxes.get(engine).map(Mailbox::len).unwrap_or(0)
    }

    pub fn sleep(&mut self, engine: &str) -> Result<bool, KernelError> {
        let changed = self.scheduler.sleep(engine)?;
        if changed {
            tracing::debug!(engine = %engine, "Engine asleep");
        }
        Ok(changed)
    }

    pub fn wake(&mut self, engine: &str) -> Result<bool, KernelError> {
        let changed = self.scheduler.wake(engine)?;
        if changed {
            tracing::debug!(engine = %engine, "Engine awake");
        }
        Ok(changed)
    }

    pub fn spend(&mut self, engine: &str, amount: u64) -> Result<BudgetStatus, KernelError> {
        self.require_engine(engine)?;
        self.debit(engine, amount)
    }

    pub fn get_budget_status(&self, engine: &str) -> BudgetStatus {
        self.budget.get_status(engine)
    }

    /// Unified registry, schedule and budget view.
    pub fn get_state(&self) -> KernelSnapshot {
        let engines = self
            .scheduler
            .engines()
            .iter()
            .map(|engine| {
                let status = self.budget.get_status(&engine.name);
                EngineSnapshot {
                    engine_name: engine.name.clone(),
                    priority: engine.priority,
                    asleep: engine.asleep,
                    pending_messages: self.get_pending_messages(&engine.name),
                    spent: status.spent,
                    remaining: status.remaining,
                    limit: status.limit,
                }
            })
            .collect();

        KernelSnapshot {
            state: self.state,
            tick_count: self.tick_count,
            engines,
        }
    }

    fn require_engine(&self, engine: &str) -> Result<(), KernelError> {
        if self.scheduler.contains(engine) {
            Ok(())
        } else {
            Err(KernelError::UnknownEngine(engine.to_string()))
        }
    }

    fn debit(&mut self, engine: &str, amount: u64) -> Result<BudgetStatus, KernelError> {
        match self.budget_mode {
            BudgetMode::Advisory => Ok(self.budget.spend(engine, amount)),
            BudgetMode::Enforced => self.budget.try_spend(engine, amount).map_err(|o| {
                tracing::warn!(
                    engine = %o.engine,
                    attempted = o.attempted,
                    remaining = o.remaining,
                    "Spend rejected by enforced budget"
                );
                KernelError::BudgetExhausted {
                    engine: o.engine,
                    attempted: o.attempted,
                    remaining: o.remaining,
                }
            }),
        }
    }
}
