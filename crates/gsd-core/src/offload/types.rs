//! Offload operations, their results and completion signals.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Exit code reported when a process was killed for exceeding its timeout
/// or never produced a status of its own.
pub const SENTINEL_EXIT_CODE: i32 = -1;

/// Selects the interpreter a script runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptType {
    Bash,
    Sh,
    Node,
    Python,
}

impl ScriptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bash => "bash",
            Self::Sh => "sh",
            Self::Node => "node",
            Self::Python => "python",
        }
    }
}

impl fmt::Display for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScriptType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bash" => Ok(Self::Bash),
            "sh" => Ok(Self::Sh),
            "node" | "js" | "ts" => Ok(Self::Node),
            "python" | "python3" | "py" => Ok(Self::Python),
            other => Err(format!("unknown script type '{other}'")),
        }
    }
}

/// A script to run out of process. Stateless; may be executed many times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OffloadOperation {
    pub id: String,
    pub script: String,
    pub script_type: ScriptType,
    pub working_dir: PathBuf,
    /// Falls back to the executor's configured default when unset
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Merged over the ambient environment
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl OffloadOperation {
    pub fn new(
        id: impl Into<String>,
        script_type: ScriptType,
        script: impl Into<String>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            script: script.into(),
            script_type,
            working_dir: working_dir.into(),
            timeout_ms: None,
            env: BTreeMap::new(),
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Outcome of one execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OffloadResult {
    pub operation_id: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl OffloadResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    Success,
    Failure,
    Timeout,
    /// The script never ran to a status of its own (spawn or wait failure)
    Error,
}

impl SignalStatus {
    /// Classify a result produced by a completed execution.
    pub fn classify(result: &OffloadResult) -> Self {
        if result.timed_out {
            Self::Timeout
        } else if result.exit_code == 0 {
            Self::Success
        } else {
            Self::Failure
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Published once on the signal bus when an offload operation finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionSignal {
    pub operation_id: String,
    pub status: SignalStatus,
    pub result: OffloadResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CompletionSignal {
    pub fn from_result(result: OffloadResult) -> Self {
        Self {
            operation_id: result.operation_id.clone(),
            status: SignalStatus::classify(&result),
            result,
            error: None,
        }
    }

    /// Signal for an operation that failed before producing a result.
    pub fn execution_error(operation_id: &str, duration_ms: u64, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            operation_id: operation_id.to_string(),
            status: SignalStatus::Error,
            result: OffloadResult {
                operation_id: operation_id.to_string(),
                exit_code: SENTINEL_EXIT_CODE,
                stdout: String::new(),
                stderr: error.clone(),
                duration_ms,
                timed_out: false,
            },
            error: Some(error),
        }
    }
}
