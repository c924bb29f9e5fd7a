use std::sync::Arc;

use courier_shared::{CodecError, Message, Opcode, Protocol, Request};

/// Request answered with the same text
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Echo(pub String);

impl Message for Echo {
    fn opcode() -> Opcode {
        1
    }

    fn name() -> &'static str {
        "Echo"
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.0.as_bytes());
    }

    fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let text = std::str::from_utf8(payload).map_err(|_| CodecError::InvalidUtf8)?;
        Ok(Echo(text.to_string()))
    }
}

impl Request for Echo {
    type Response = Echo;
}

/// One-way message with an opaque body
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Note(pub Vec<u8>);

impl Message for Note {
    fn opcode() -> Opcode {
        2
    }

    fn name() -> &'static str {
        "Note"
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0);
    }

    fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        Ok(Note(payload.to_vec()))
    }
}

/// Adds to an actor's counter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bump(pub u32);

/// Counter value after a Bump
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Count(pub u32);

impl Message for Bump {
    fn opcode() -> Opcode {
        3
    }

    fn name() -> &'static str {
        "Bump"
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0.to_le_bytes());
    }

    fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        read_u32(payload).map(Bump)
    }
}

impl Request for Bump {
    type Response = Count;
}

impl Message for Count {
    fn opcode() -> Opcode {
        4
    }

    fn name() -> &'static str {
        "Count"
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0.to_le_bytes());
    }

    fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        read_u32(payload).map(Count)
    }
}

fn read_u32(payload: &[u8]) -> Result<u32, CodecError> {
    let bytes: [u8; 4] = payload.try_into().map_err(|_| CodecError::Truncated {
        needed: 4,
        available: payload.len(),
    })?;
    Ok(u32::from_le_bytes(bytes))
}

/// Protocol shared by every test node
pub fn protocol() -> Arc<Protocol> {
    let mut builder = Protocol::builder();
    builder
        .add_request::<Echo>()
        .and_then(|builder| builder.add_message::<Note>())
        .and_then(|builder| builder.add_request::<Bump>())
        .expect("test protocol registers each opcode once");
    Arc::new(builder.build().expect("test protocol is not locked"))
}
