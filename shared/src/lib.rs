//! # Courier Shared
//! Framing, actor addressing, error codes and thread confinement shared
//! between the courier-service crate and its users.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

mod actor_id;
mod confinement;
mod error_code;
mod frame;
mod messages;
mod protocol;
mod types;
mod wrapping_number;

pub use actor_id::{ActorId, Address};
pub use confinement::{
    Action, ActionPoster, ActionQueue, ConfinementError, ConfinementQueue, Poster,
};
pub use error_code::ErrorCode;
pub use frame::{flags, ErrorPayload, Frame, FramingError, HeaderWidth, PacketReassembler};
pub use messages::{
    error::{CodecError, MessageKindsError},
    message::{Message, Request},
    message_kinds::{MessageKind, MessageKinds, MessageRole},
};
pub use protocol::{Protocol, ProtocolError, ProtocolPlugin};
pub use types::{ConnectionId, CorrelationId, Opcode, Reliability, ServiceKind, SequenceNumber, SubChannel};
pub use wrapping_number::{sequence_distance, sequence_greater_than, sequence_less_than};

pub use bytes::Bytes;
