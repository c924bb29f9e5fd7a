//! The fixed-layout header every courier message travels under.
//!
//! All integers are little-endian. The client-width header is
//! `opcode u16 | flags u8 | correlation_id i32`; the inter-process header
//! appends `process i32 | sub_process i32 | instance_id i64`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    actor_id::{ActorId, Address},
    error_code::ErrorCode,
    types::{CorrelationId, Opcode},
};

pub mod error;
pub mod reassembler;

pub use error::FramingError;
pub use reassembler::PacketReassembler;

/// Header layout used by a Service
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HeaderWidth {
    /// opcode, flags, correlation id
    Client,
    /// Client header followed by the full ActorId
    InterProcess,
}

impl HeaderWidth {
    pub const CLIENT_LEN: usize = 7;
    pub const INTER_PROCESS_LEN: usize = 23;

    pub fn len(&self) -> usize {
        match self {
            HeaderWidth::Client => Self::CLIENT_LEN,
            HeaderWidth::InterProcess => Self::INTER_PROCESS_LEN,
        }
    }
}

pub mod flags {
    /// The frame answers a request
    pub const RESPONSE: u8 = 0x01;
    /// The response carries an ErrorPayload instead of a message
    pub const ERROR: u8 = 0x02;

    pub(crate) const KNOWN: u8 = RESPONSE | ERROR;
}

/// One framed message. Frames are immutable once built; the payload is a
/// reference-counted buffer so cloning a Frame never copies message bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    opcode: Opcode,
    correlation_id: CorrelationId,
    actor_id: ActorId,
    flags: u8,
    payload: Bytes,
}

impl Frame {
    pub fn new(
        opcode: Opcode,
        correlation_id: CorrelationId,
        actor_id: ActorId,
        flags: u8,
        payload: Bytes,
    ) -> Self {
        Self {
            opcode,
            correlation_id,
            actor_id,
            flags,
            payload,
        }
    }

    /// One-way message, correlation id 0
    pub fn message(opcode: Opcode, payload: Bytes) -> Self {
        Self::new(opcode, 0, ActorId::NONE, 0, payload)
    }

    pub fn request(opcode: Opcode, correlation_id: CorrelationId, payload: Bytes) -> Self {
        Self::new(opcode, correlation_id, ActorId::NONE, 0, payload)
    }

    pub fn response(
        opcode: Opcode,
        correlation_id: CorrelationId,
        actor_id: ActorId,
        payload: Bytes,
    ) -> Self {
        Self::new(opcode, correlation_id, actor_id, flags::RESPONSE, payload)
    }

    pub fn error_response(
        opcode: Opcode,
        correlation_id: CorrelationId,
        actor_id: ActorId,
        error: &ErrorPayload,
    ) -> Self {
        Self::new(
            opcode,
            correlation_id,
            actor_id,
            flags::RESPONSE | flags::ERROR,
            error.encode(),
        )
    }

    /// Returns a copy of this frame addressed to `actor_id`
    pub fn with_actor(&self, actor_id: ActorId) -> Self {
        Self {
            actor_id,
            ..self.clone()
        }
    }

    /// Returns a copy of this frame under a different correlation id
    pub fn with_correlation(&self, correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            ..self.clone()
        }
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn actor_id(&self) -> ActorId {
        self.actor_id
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn is_response(&self) -> bool {
        self.flags & flags::RESPONSE != 0
    }

    pub fn is_error(&self) -> bool {
        self.is_response() && self.flags & flags::ERROR != 0
    }

    pub fn is_one_way(&self) -> bool {
        self.correlation_id == 0
    }

    pub fn is_actor_addressed(&self) -> bool {
        !self.actor_id.is_none()
    }

    /// Serializes header and payload into one packet
    pub fn encode(&self, width: HeaderWidth) -> Result<Bytes, FramingError> {
        if width == HeaderWidth::Client && !self.actor_id.is_none() {
            return Err(FramingError::ActorIdNotRepresentable {
                actor: self.actor_id,
            });
        }

        let mut out = BytesMut::with_capacity(width.len() + self.payload.len());
        out.put_u16_le(self.opcode);
        out.put_u8(self.flags);
        out.put_i32_le(self.correlation_id);
        if width == HeaderWidth::InterProcess {
            out.put_i32_le(self.actor_id.address.process);
            out.put_i32_le(self.actor_id.address.sub_process);
            out.put_i64_le(self.actor_id.instance_id);
        }
        out.put_slice(&self.payload);

        Ok(out.freeze())
    }

    /// Parses a packet. The payload is sliced out of `packet` without
    /// copying and is not validated.
    pub fn decode(packet: Bytes, width: HeaderWidth) -> Result<Self, FramingError> {
        if packet.len() < width.len() {
            return Err(FramingError::Truncated {
                length: packet.len(),
                header: width.len(),
            });
        }

        let mut header = &packet[..width.len()];
        let opcode = header.get_u16_le();
        let flags = header.get_u8();
        if flags & !flags::KNOWN != 0 {
            return Err(FramingError::UnknownFlags { flags });
        }
        let correlation_id = header.get_i32_le();
        let actor_id = match width {
            HeaderWidth::Client => ActorId::NONE,
            HeaderWidth::InterProcess => {
                let process = header.get_i32_le();
                let sub_process = header.get_i32_le();
                let instance_id = header.get_i64_le();
                ActorId::new(Address::new(process, sub_process), instance_id)
            }
        };

        Ok(Self {
            opcode,
            correlation_id,
            actor_id,
            flags,
            payload: packet.slice(width.len()..),
        })
    }
}

/// Body of an error-flagged response
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorPayload {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(4 + self.message.len());
        out.put_i32_le(self.code.code());
        out.put_slice(self.message.as_bytes());
        out.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, FramingError> {
        if payload.len() < 4 {
            return Err(FramingError::TruncatedErrorPayload {
                length: payload.len(),
            });
        }
        let mut reader = payload;
        let code = ErrorCode::from_code(reader.get_i32_le());
        let message = std::str::from_utf8(reader)
            .map_err(|_| FramingError::InvalidErrorMessage)?
            .to_string();
        Ok(Self { code, message })
    }
}
