//! Typed message payloads, one variant per message kind.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::MessageType;
use crate::kernel::BudgetStatus;

/// Payload of a kernel message, tagged by its message kind.
///
/// On the wire this is `{"type": "<kind>", "payload": {...}}`; unit kinds
/// carry no `payload` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum MessagePayload {
    BudgetQuery {
        #[serde(default)]
        engine: Option<String>,
    },
    BudgetReport {
        engine: String,
        status: BudgetStatus,
    },
    BudgetWarning {
        engine: String,
        remaining: i64,
    },
    AllocRequest {
        resource: String,
        amount: u64,
    },
    AllocGrant {
        resource: String,
        amount: u64,
    },
    AllocRelease {
        resource: String,
        amount: u64,
    },
    ScheduleTick {
        tick: u64,
    },
    EngineSleep {
        engine: String,
    },
    EngineWake {
        engine: String,
    },
    RenderRequest {
        template: String,
        #[serde(default)]
        context: Value,
    },
    RenderResult {
        output: String,
    },
    FormatRequest {
        format: String,
        content: String,
    },
    FormatResult {
        content: String,
    },
    IoRead {
        path: String,
    },
    IoWrite {
        path: String,
        content: String,
    },
    IoResult {
        path: String,
        ok: bool,
        #[serde(default)]
        content: Option<String>,
    },
    ObserveEvent {
        event: String,
        #[serde(default)]
        detail: Value,
    },
    ObserveReport {
        summary: String,
    },
    RouteRequest {
        intent: String,
    },
    RouteDecision {
        target: String,
        reason: String,
    },
    PatternAppend {
        category: String,
        data: Value,
    },
    PatternQuery {
        category: String,
    },
    PatternResult {
        category: String,
        records: Vec<Value>,
    },
    Ping,
    Pong,
    Shutdown {
        #[serde(default)]
        reason: Option<String>,
    },
    Error {
        message: String,
    },
}

impl MessagePayload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::BudgetQuery { .. } => MessageType::BudgetQuery,
            Self::BudgetReport { .. } => MessageType::BudgetReport,
            Self::BudgetWarning { .. } => MessageType::BudgetWarning,
            Self::AllocRequest { .. } => MessageType::AllocRequest,
            Self::AllocGrant { .. } => MessageType::AllocGrant,
            Self::AllocRelease { .. } => MessageType::AllocRelease,
            Self::ScheduleTick { .. } => MessageType::ScheduleTick,
            Self::EngineSleep { .. } => MessageType::EngineSleep,
            Self::EngineWake { .. } => MessageType::EngineWake,
            Self::RenderRequest { .. } => MessageType::RenderRequest,
            Self::RenderResult { .. } => MessageType::RenderResult,
            Self::FormatRequest { .. } => MessageType::FormatRequest,
            Self::FormatResult { .. } => MessageType::FormatResult,
            Self::IoRead { .. } => MessageType::IoRead,
            Self::IoWrite { .. } => MessageType::IoWrite,
            Self::IoResult { .. } => MessageType::IoResult,
            Self::ObserveEvent { .. } => MessageType::ObserveEvent,
            Self::ObserveReport { .. } => MessageType::ObserveReport,
            Self::RouteRequest { .. } => MessageType::RouteRequest,
            Self::RouteDecision { .. } => MessageType::RouteDecision,
            Self::PatternAppend { .. } => MessageType::PatternAppend,
            Self::PatternQuery { .. } => MessageType::PatternQuery,
            Self::PatternResult { .. } => MessageType::PatternResult,
            Self::Ping => MessageType::Ping,
            Self::Pong => MessageType::Pong,
            Self::Shutdown { .. } => MessageType::Shutdown,
            Self::Error { .. } => MessageType::Error,
        }
    }
}
