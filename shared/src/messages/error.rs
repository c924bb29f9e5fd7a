use thiserror::Error;

use crate::types::Opcode;

/// Errors a payload codec reports while decoding a message body
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Payload ended before the message was complete
    #[error("Payload ended early: needed {needed} more bytes but only {available} remain")]
    Truncated { needed: usize, available: usize },

    /// A string field is not valid UTF-8
    #[error("String field is not valid UTF-8")]
    InvalidUtf8,

    /// Payload was well-formed but violates the message's own rules
    #[error("Invalid message payload: {reason}")]
    Invalid { reason: String },
}

/// Errors that can occur during message kind registration and lookup
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageKindsError {
    /// Two message types claim the same opcode
    #[error("Opcode {opcode} is already registered to {existing}, cannot register {incoming}. Every message type needs its own opcode")]
    DuplicateOpcode {
        opcode: Opcode,
        existing: &'static str,
        incoming: &'static str,
    },

    /// Opcode not found in registry
    #[error("Opcode {opcode} not found in message registry. Message type must be registered with Protocol via add_message() or add_request()")]
    OpcodeNotFound { opcode: Opcode },
}
