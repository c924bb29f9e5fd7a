use crate::{messages::error::CodecError, types::Opcode};

/// An application message with a fixed opcode and its own byte codec.
/// The courier core never looks inside the encoded bytes.
pub trait Message: Send + Sync + Sized + 'static {
    /// Wire opcode, unique within a Protocol
    fn opcode() -> Opcode;

    /// Human-readable name used in logs and errors
    fn name() -> &'static str;

    fn encode(&self, out: &mut Vec<u8>);

    fn decode(payload: &[u8]) -> Result<Self, CodecError>;

    /// Encodes into a fresh buffer
    fn to_payload(&self) -> bytes::Bytes {
        let mut out = Vec::new();
        self.encode(&mut out);
        out.into()
    }
}

/// A Message that expects exactly one reply of type `Response`
pub trait Request: Message {
    type Response: Message;
}
