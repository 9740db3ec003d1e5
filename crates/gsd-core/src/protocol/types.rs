//! Message kinds and the domains they belong to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ProtocolError;

/// Functional domain a message kind belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageDomain {
    Budget,
    Allocation,
    Scheduling,
    Rendering,
    Formatting,
    Io,
    Observation,
    Routing,
    PatternData,
    System,
}

/// Closed set of message kinds understood by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    BudgetQuery,
    BudgetReport,
    BudgetWarning,
    AllocRequest,
    AllocGrant,
    AllocRelease,
    ScheduleTick,
    EngineSleep,
    EngineWake,
    RenderRequest,
    RenderResult,
    FormatRequest,
    FormatResult,
    IoRead,
    IoWrite,
    IoResult,
    ObserveEvent,
    ObserveReport,
    RouteRequest,
    RouteDecision,
    PatternAppend,
    PatternQuery,
    PatternResult,
    Ping,
    Pong,
    Shutdown,
    Error,
}

impl MessageType {
    pub const ALL: [MessageType; 27] = [
        Self::BudgetQuery,
        Self::BudgetReport,
        Self::BudgetWarning,
        Self::AllocRequest,
        Self::AllocGrant,
        Self::AllocRelease,
        Self::ScheduleTick,
        Self::EngineSleep,
        Self::EngineWake,
        Self::RenderRequest,
        Self::RenderResult,
        Self::FormatRequest,
        Self::FormatResult,
        Self::IoRead,
        Self::IoWrite,
        Self::IoResult,
        Self::ObserveEvent,
        Self::ObserveReport,
        Self::RouteRequest,
        Self::RouteDecision,
        Self::PatternAppend,
        Self::PatternQuery,
        Self::PatternResult,
        Self::Ping,
        Self::Pong,
        Self::Shutdown,
        Self::Error,
    ];

    /// Wire name of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BudgetQuery => "budget-query",
            Self::BudgetReport => "budget-report",
            Self::BudgetWarning => "budget-warning",
            Self::AllocRequest => "alloc-request",
            Self::AllocGrant => "alloc-grant",
            Self::AllocRelease => "alloc-release",
            Self::ScheduleTick => "schedule-tick",
            Self::EngineSleep => "engine-sleep",
            Self::EngineWake => "engine-wake",
            Self::RenderRequest => "render-request",
            Self::RenderResult => "render-result",
            Self::FormatRequest => "format-request",
            Self::FormatResult => "format-result",
            Self::IoRead => "io-read",
            Self::IoWrite => "io-write",
            Self::IoResult => "io-result",
            Self::ObserveEvent => "observe-event",
            Self::ObserveReport => "observe-report",
            Self::RouteRequest => "route-request",
            Self::RouteDecision => "route-decision",
            Self::PatternAppend => "pattern-append",
            Self::PatternQuery => "pattern-query",
            Self::PatternResult => "pattern-result",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Shutdown => "shutdown",
            Self::Error => "error",
        }
    }

    /// Domain grouping for this kind
    pub fn domain(&self) -> MessageDomain {
        match self {
            Self::BudgetQuery | Self::BudgetReport | Self::BudgetWarning => MessageDomain::Budget,
            Self::AllocRequest | Self::AllocGrant | Self::AllocRelease => {
                MessageDomain::Allocation
            }
            Self::ScheduleTick | Self::EngineSleep | Self::EngineWake => MessageDomain::Scheduling,
            Self::RenderRequest | Self::RenderResult => MessageDomain::Rendering,
            Self::FormatRequest | Self::FormatResult => MessageDomain::Formatting,
            Self::IoRead | Self::IoWrite | Self::IoResult => MessageDomain::Io,
            Self::ObserveEvent | Self::ObserveReport => MessageDomain::Observation,
            Self::RouteRequest | Self::RouteDecision => MessageDomain::Routing,
            Self::PatternAppend | Self::PatternQuery | Self::PatternResult => {
                MessageDomain::PatternData
            }
            Self::Ping | Self::Pong | Self::Shutdown | Self::Error => MessageDomain::System,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ProtocolError::InvalidType(s.to_string()))
    }
}
