//! Kernel configuration loading and management.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::kernel::{BudgetMode, EngineRegistration};
use crate::offload::ScriptType;

/// Main kernel configuration, loaded from .gsd/kernel.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Config version
    pub version: Option<String>,

    /// Shared token pool for all engines
    #[serde(default = "default_total_budget")]
    pub total_budget: u64,

    /// Whether spends beyond the pool are rejected
    #[serde(default)]
    pub budget_mode: BudgetMode,

    /// Engine registry, in registration order
    #[serde(default = "default_engines")]
    pub engines: Vec<EngineRegistration>,

    /// Offloaded script execution
    #[serde(default)]
    pub offload: OffloadConfig,

    /// Drift monitoring
    #[serde(default)]
    pub drift: DriftConfig,

    /// Pattern store directory (relative to project root)
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
}

fn default_total_budget() -> u64 {
    200_000
}

fn default_store_dir() -> PathBuf {
    PathBuf::from(".gsd/patterns")
}

fn default_engines() -> Vec<EngineRegistration> {
    [
        ("router", 40),
        ("planner", 30),
        ("io", 20),
        ("renderer", 10),
        ("formatter", 10),
        ("observer", 5),
    ]
    .into_iter()
    .map(|(name, priority)| EngineRegistration {
        name: name.to_string(),
        priority,
        asleep: false,
    })
    .collect()
}

/// Offload executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OffloadConfig {
    /// Timeout applied when an operation does not set one
    pub default_timeout_ms: u64,

    /// Time between SIGTERM and SIGKILL after a timeout
    pub kill_grace_ms: u64,

    /// Captured stdout/stderr is truncated to this many bytes
    pub max_output_bytes: usize,

    /// Interpreter used for each script type
    pub interpreters: InterpreterTable,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            kill_grace_ms: 2_000,
            max_output_bytes: 1_048_576,
            interpreters: InterpreterTable::default(),
        }
    }
}

/// An executable and the arguments that precede the script text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interpreter {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Interpreter {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Maps script types to interpreters. Injectable so tests and hosts can
/// point at specific runtimes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InterpreterTable(BTreeMap<ScriptType, Interpreter>);

impl InterpreterTable {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, script_type: ScriptType, interpreter: Interpreter) -> Self {
        self.0.insert(script_type, interpreter);
        self
    }

    pub fn resolve(&self, script_type: ScriptType) -> Option<&Interpreter> {
        self.0.get(&script_type)
    }
}

impl Default for InterpreterTable {
    fn default() -> Self {
        Self::empty()
            .with(ScriptType::Bash, Interpreter::new("bash", &["-c"]))
            .with(ScriptType::Sh, Interpreter::new("sh", &["-c"]))
            .with(ScriptType::Node, Interpreter::new("node", &["-e"]))
            .with(ScriptType::Python, Interpreter::new("python3", &["-c"]))
    }
}

/// Drift monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// When disabled, checks report "disabled" and keep no state
    pub enabled: bool,

    /// Consecutive mismatches that trigger demotion
    pub sensitivity: u32,

    /// Store category drift events are persisted under
    pub category: String,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sensitivity: 3,
            category: "drift".to_string(),
        }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            version: None,
            total_budget: default_total_budget(),
            budget_mode: BudgetMode::default(),
            engines: default_engines(),
            offload: OffloadConfig::default(),
            drift: DriftConfig::default(),
            store_dir: default_store_dir(),
        }
    }
}

impl KernelConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        Ok(config)
    }

    /// Load from project root (looks for .gsd/kernel.yaml)
    pub fn load_from_project(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join(".gsd/kernel.yaml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Resolve paths relative to project root
    pub fn resolve_paths(&mut self, project_root: &Path) {
        self.store_dir = project_root.join(&self.store_dir);
    }
}
