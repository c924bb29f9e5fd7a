use std::fmt;

use crate::frame::HeaderWidth;

pub type SequenceNumber = u16;
pub type CorrelationId = i32;
pub type Opcode = u16;
pub type SubChannel = u8;

/// Process-local identifier of a Channel inside a Service. Assigned
/// monotonically and never reused while the Service is alive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn to_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Whether a Service faces clients or other processes of the same system.
/// Determines the header width of every frame the Service exchanges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    /// Client-facing; frames carry no actor routing fields
    Outer,
    /// Process-to-process; frames carry the full actor id
    Inner,
}

impl ServiceKind {
    pub fn header_width(self) -> HeaderWidth {
        match self {
            ServiceKind::Outer => HeaderWidth::Client,
            ServiceKind::Inner => HeaderWidth::InterProcess,
        }
    }
}

/// Per-send delivery guarantee. Only the reliable UDP transport can honor
/// `Unreliable`; stream transports always deliver reliably and in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Reliability {
    ReliableOrdered,
    Unreliable,
}

impl Default for Reliability {
    fn default() -> Self {
        Reliability::ReliableOrdered
    }
}
