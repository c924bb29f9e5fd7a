use std::{mem, net::SocketAddr, vec::IntoIter};

use courier_shared::{ConnectionId, ErrorCode};

/// Session lifecycle changes observed by one `Node::pump`
pub struct NodeEvents {
    opened: Vec<(ConnectionId, Option<SocketAddr>)>,
    closed: Vec<(ConnectionId, ErrorCode)>,
    empty: bool,
}

impl NodeEvents {
    pub(crate) fn new() -> Self {
        Self {
            opened: Vec::new(),
            closed: Vec::new(),
            empty: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn read<V: NodeEvent>(&mut self) -> V::Iter {
        V::iter(self)
    }

    pub fn has<V: NodeEvent>(&self) -> bool {
        V::has(self)
    }

    pub(crate) fn push_opened(&mut self, id: ConnectionId, remote: Option<SocketAddr>) {
        self.opened.push((id, remote));
        self.empty = false;
    }

    pub(crate) fn push_closed(&mut self, id: ConnectionId, code: ErrorCode) {
        self.closed.push((id, code));
        self.empty = false;
    }
}

// Event Trait
pub trait NodeEvent {
    type Iter;

    fn iter(events: &mut NodeEvents) -> Self::Iter;

    fn has(events: &NodeEvents) -> bool;
}

// SessionOpenedEvent
/// An accepted connection (with its remote address) or a finished outbound
/// connect (without one)
pub struct SessionOpenedEvent;
impl NodeEvent for SessionOpenedEvent {
    type Iter = IntoIter<(ConnectionId, Option<SocketAddr>)>;

    fn iter(events: &mut NodeEvents) -> Self::Iter {
        let list = mem::take(&mut events.opened);
        IntoIterator::into_iter(list)
    }

    fn has(events: &NodeEvents) -> bool {
        !events.opened.is_empty()
    }
}

// SessionClosedEvent
pub struct SessionClosedEvent;
impl NodeEvent for SessionClosedEvent {
    type Iter = IntoIter<(ConnectionId, ErrorCode)>;

    fn iter(events: &mut NodeEvents) -> Self::Iter {
        let list = mem::take(&mut events.closed);
        IntoIterator::into_iter(list)
    }

    fn has(events: &NodeEvents) -> bool {
        !events.closed.is_empty()
    }
}
