use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::FramingError;

const LENGTH_PREFIX: usize = 4;

/// Rebuilds whole packets from a byte stream where every packet is prefixed
/// with its length as a little-endian `u32`.
pub struct PacketReassembler {
    buffer: BytesMut,
    max_packet_size: usize,
}

impl PacketReassembler {
    pub fn new(max_packet_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_packet_size,
        }
    }

    /// Writes the length prefix and `packet` into `out`
    pub fn write_packet(packet: &[u8], out: &mut BytesMut) {
        out.reserve(LENGTH_PREFIX + packet.len());
        out.put_u32_le(packet.len() as u32);
        out.put_slice(packet);
    }

    /// Appends a chunk as it came off the stream
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Returns the next complete packet, if one is buffered. An error leaves
    /// the stream unusable; the caller is expected to drop the connection.
    pub fn next_packet(&mut self) -> Result<Option<Bytes>, FramingError> {
        if self.buffer.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let mut prefix = &self.buffer[..LENGTH_PREFIX];
        let length = prefix.get_u32_le() as usize;
        if length == 0 {
            return Err(FramingError::ZeroLengthPacket);
        }
        if length > self.max_packet_size {
            return Err(FramingError::PacketTooLarge {
                length,
                max: self.max_packet_size,
            });
        }
        if self.buffer.len() < LENGTH_PREFIX + length {
            return Ok(None);
        }

        self.buffer.advance(LENGTH_PREFIX);
        Ok(Some(self.buffer.split_to(length).freeze()))
    }

    /// Bytes received but not yet returned as a packet
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
