use thiserror::Error;

use crate::{actor_id::ActorId, error_code::ErrorCode};

/// Errors that can occur while encoding or decoding a Frame, or while
/// reassembling length-prefixed packets from a byte stream
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    /// Input is shorter than the fixed header
    #[error("Packet of {length} bytes is shorter than the {header} byte frame header")]
    Truncated { length: usize, header: usize },

    /// Flag byte carries bits this version does not understand
    #[error("Frame flag byte {flags:#04x} contains unknown bits")]
    UnknownFlags { flags: u8 },

    /// Client-width headers have no room for actor routing fields
    #[error("ActorId {actor} cannot be encoded in a client-width header. Use an inter-process Service to address actors")]
    ActorIdNotRepresentable { actor: ActorId },

    /// A length prefix declares a packet above the configured maximum
    #[error("Declared packet length {length} exceeds the maximum packet size of {max} bytes")]
    PacketTooLarge { length: usize, max: usize },

    /// A length prefix of zero never describes a valid frame
    #[error("Stream declared a zero-length packet")]
    ZeroLengthPacket,

    /// Error-flagged response payload is too short to hold an error code
    #[error("Error payload of {length} bytes is too short to hold an error code")]
    TruncatedErrorPayload { length: usize },

    /// Error-flagged response message is not valid UTF-8
    #[error("Error payload message is not valid UTF-8")]
    InvalidErrorMessage,
}

impl FramingError {
    /// The normalized code reported to whoever owns the failing Channel
    pub fn error_code(&self) -> ErrorCode {
        match self {
            FramingError::PacketTooLarge { .. } => ErrorCode::MessageTooLarge,
            _ => ErrorCode::MalformedFrame,
        }
    }
}
