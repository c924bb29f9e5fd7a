//! Datagram layout of the reliable UDP engine.
//!
//! Every datagram starts with `kind u8 | sender_conn u32 | receiver_conn u32`
//! (little-endian). `MSG` continues with
//! `sub_channel u8 | delivery u8 | sequence u16 | payload`, `MSG_ACK` with
//! `sub_channel u8 | sequence u16`, and `FIN` with an `i32` error code.
//! `RECONNECT` and `RECONNECT_ACK` are header only: a peer whose address
//! changed proves both conn ids before the other side follows it.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use courier_shared::{SequenceNumber, SubChannel};

pub(crate) const HEADER_LEN: usize = 9;
pub(crate) const MSG_HEADER_LEN: usize = HEADER_LEN + 4;

const KIND_SYN: u8 = 1;
const KIND_ACK: u8 = 2;
const KIND_FIN: u8 = 3;
const KIND_MSG: u8 = 4;
const KIND_MSG_ACK: u8 = 5;
const KIND_PING: u8 = 6;
const KIND_RECONNECT: u8 = 7;
const KIND_RECONNECT_ACK: u8 = 8;

const DELIVERY_RELIABLE: u8 = 0;
const DELIVERY_UNRELIABLE: u8 = 1;
// set on every fragment of a reliable message except the last
const DELIVERY_MORE_FRAGMENTS: u8 = 0x80;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    Reliable { more_fragments: bool },
    Unreliable,
}

impl Delivery {
    fn to_byte(self) -> u8 {
        match self {
            Delivery::Reliable { more_fragments } => {
                if more_fragments {
                    DELIVERY_RELIABLE | DELIVERY_MORE_FRAGMENTS
                } else {
                    DELIVERY_RELIABLE
                }
            }
            Delivery::Unreliable => DELIVERY_UNRELIABLE,
        }
    }

    fn from_byte(byte: u8) -> Result<Self, DatagramError> {
        match byte {
            DELIVERY_RELIABLE => Ok(Delivery::Reliable {
                more_fragments: false,
            }),
            b if b == DELIVERY_RELIABLE | DELIVERY_MORE_FRAGMENTS => Ok(Delivery::Reliable {
                more_fragments: true,
            }),
            DELIVERY_UNRELIABLE => Ok(Delivery::Unreliable),
            other => Err(DatagramError::UnknownDelivery { delivery: other }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Datagram {
    /// Connect request from a peer choosing `sender` as its conn id
    Syn { sender: u32 },
    /// Accept answer; `receiver` echoes the SYN's sender
    Ack { sender: u32, receiver: u32 },
    /// Disconnect with a normalized error code
    Fin { sender: u32, receiver: u32, code: i32 },
    Msg {
        sender: u32,
        receiver: u32,
        sub_channel: SubChannel,
        delivery: Delivery,
        sequence: SequenceNumber,
        payload: Bytes,
    },
    MsgAck {
        sender: u32,
        receiver: u32,
        sub_channel: SubChannel,
        sequence: SequenceNumber,
    },
    Ping { sender: u32, receiver: u32 },
    /// Sent by the connecting side when it stops hearing from the remote,
    /// possibly from a new address
    Reconnect { sender: u32, receiver: u32 },
    ReconnectAck { sender: u32, receiver: u32 },
}

/// Errors that can occur while decoding a datagram
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum DatagramError {
    #[error("Datagram of {length} bytes is too short for a {kind} datagram")]
    Truncated { length: usize, kind: &'static str },

    #[error("Unknown datagram kind {kind}")]
    UnknownKind { kind: u8 },

    #[error("Unknown delivery byte {delivery:#04x}")]
    UnknownDelivery { delivery: u8 },
}

impl Datagram {
    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            Datagram::Syn { sender } => write_header(out, KIND_SYN, *sender, 0),
            Datagram::Ack { sender, receiver } => write_header(out, KIND_ACK, *sender, *receiver),
            Datagram::Fin {
                sender,
                receiver,
                code,
            } => {
                write_header(out, KIND_FIN, *sender, *receiver);
                out.put_i32_le(*code);
            }
            Datagram::Msg {
                sender,
                receiver,
                sub_channel,
                delivery,
                sequence,
                payload,
            } => {
                write_header(out, KIND_MSG, *sender, *receiver);
                out.put_u8(*sub_channel);
                out.put_u8(delivery.to_byte());
                out.put_u16_le(*sequence);
                out.put_slice(payload);
            }
            Datagram::MsgAck {
                sender,
                receiver,
                sub_channel,
                sequence,
            } => {
                write_header(out, KIND_MSG_ACK, *sender, *receiver);
                out.put_u8(*sub_channel);
                out.put_u16_le(*sequence);
            }
            Datagram::Ping { sender, receiver } => {
                write_header(out, KIND_PING, *sender, *receiver)
            }
            Datagram::Reconnect { sender, receiver } => {
                write_header(out, KIND_RECONNECT, *sender, *receiver)
            }
            Datagram::ReconnectAck { sender, receiver } => {
                write_header(out, KIND_RECONNECT_ACK, *sender, *receiver)
            }
        }
    }

    /// Decodes a received datagram, copying any payload out of `input`
    pub fn decode(input: &[u8]) -> Result<Self, DatagramError> {
        if input.len() < HEADER_LEN {
            return Err(DatagramError::Truncated {
                length: input.len(),
                kind: "any",
            });
        }
        let mut reader = input;
        let kind = reader.get_u8();
        let sender = reader.get_u32_le();
        let receiver = reader.get_u32_le();

        let require = |needed: usize, kind: &'static str| {
            if input.len() < HEADER_LEN + needed {
                Err(DatagramError::Truncated {
                    length: input.len(),
                    kind,
                })
            } else {
                Ok(())
            }
        };

        match kind {
            KIND_SYN => Ok(Datagram::Syn { sender }),
            KIND_ACK => Ok(Datagram::Ack { sender, receiver }),
            KIND_FIN => {
                require(4, "FIN")?;
                Ok(Datagram::Fin {
                    sender,
                    receiver,
                    code: reader.get_i32_le(),
                })
            }
            KIND_MSG => {
                require(4, "MSG")?;
                let sub_channel = reader.get_u8();
                let delivery = Delivery::from_byte(reader.get_u8())?;
                let sequence = reader.get_u16_le();
                Ok(Datagram::Msg {
                    sender,
                    receiver,
                    sub_channel,
                    delivery,
                    sequence,
                    payload: Bytes::copy_from_slice(reader),
                })
            }
            KIND_MSG_ACK => {
                require(3, "MSG_ACK")?;
                Ok(Datagram::MsgAck {
                    sender,
                    receiver,
                    sub_channel: reader.get_u8(),
                    sequence: reader.get_u16_le(),
                })
            }
            KIND_PING => Ok(Datagram::Ping { sender, receiver }),
            KIND_RECONNECT => Ok(Datagram::Reconnect { sender, receiver }),
            KIND_RECONNECT_ACK => Ok(Datagram::ReconnectAck { sender, receiver }),
            other => Err(DatagramError::UnknownKind { kind: other }),
        }
    }
}

fn write_header(out: &mut BytesMut, kind: u8, sender: u32, receiver: u32) {
    out.put_u8(kind);
    out.put_u32_le(sender);
    out.put_u32_le(receiver);
}
