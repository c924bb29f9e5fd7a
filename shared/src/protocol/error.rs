use thiserror::Error;

use crate::messages::error::MessageKindsError;

/// Errors raised while building a Protocol
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// build() or lock() was already called
    #[error("Protocol is locked. Message kinds can only be added before build() or lock()")]
    AlreadyLocked,

    /// Registration clashed with an existing message kind
    #[error("Message registration failed: {0}")]
    MessageKinds(#[from] MessageKindsError),
}
