//! Protocol - typed envelopes exchanged between engines.

mod message;
mod payload;
mod types;

use thiserror::Error;

pub use message::{
    create_message, create_reply, KernelMessage, MessageOptions, ReplyOptions,
};
pub use payload::MessagePayload;
pub use types::{MessageDomain, MessageType};

/// Malformed message construction. Always surfaced to the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("message type is required")]
    MissingType,

    #[error("unknown message type '{0}'")]
    InvalidType(String),

    #[error("message {field} is required")]
    MissingField { field: &'static str },

    #[error("invalid {field} '{value}': {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("message {id} has no reply port and cannot be replied to")]
    MissingReplyPort { id: String },

    #[error("malformed envelope: {0}")]
    Malformed(String),
}
