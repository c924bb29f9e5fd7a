use std::{mem, net::SocketAddr, vec::IntoIter};

use courier_shared::{ConnectionId, ErrorCode, Frame};

/// Everything one `Service::pump` observed, grouped by kind
pub struct ServiceEvents {
    accepts: Vec<(ConnectionId, SocketAddr)>,
    connects: Vec<ConnectionId>,
    errors: Vec<(ConnectionId, ErrorCode)>,
    frames: Vec<(ConnectionId, Frame)>,
    empty: bool,
}

impl ServiceEvents {
    pub(crate) fn new() -> Self {
        Self {
            accepts: Vec::new(),
            connects: Vec::new(),
            errors: Vec::new(),
            frames: Vec::new(),
            empty: true,
        }
    }

    // Public

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn read<V: ServiceEvent>(&mut self) -> V::Iter {
        V::iter(self)
    }

    pub fn has<V: ServiceEvent>(&self) -> bool {
        V::has(self)
    }

    // Crate-public

    pub(crate) fn push_accept(&mut self, id: ConnectionId, remote: SocketAddr) {
        self.accepts.push((id, remote));
        self.empty = false;
    }

    pub(crate) fn push_connect(&mut self, id: ConnectionId) {
        self.connects.push(id);
        self.empty = false;
    }

    pub(crate) fn push_error(&mut self, id: ConnectionId, code: ErrorCode) {
        self.errors.push((id, code));
        self.empty = false;
    }

    pub(crate) fn push_frame(&mut self, id: ConnectionId, frame: Frame) {
        self.frames.push((id, frame));
        self.empty = false;
    }
}

// Event Trait
pub trait ServiceEvent {
    type Iter;

    fn iter(events: &mut ServiceEvents) -> Self::Iter;

    fn has(events: &ServiceEvents) -> bool;
}

// AcceptEvent
pub struct AcceptEvent;
impl ServiceEvent for AcceptEvent {
    type Iter = IntoIter<(ConnectionId, SocketAddr)>;

    fn iter(events: &mut ServiceEvents) -> Self::Iter {
        let list = mem::take(&mut events.accepts);
        IntoIterator::into_iter(list)
    }

    fn has(events: &ServiceEvents) -> bool {
        !events.accepts.is_empty()
    }
}

// ConnectEvent
pub struct ConnectEvent;
impl ServiceEvent for ConnectEvent {
    type Iter = IntoIter<ConnectionId>;

    fn iter(events: &mut ServiceEvents) -> Self::Iter {
        let list = mem::take(&mut events.connects);
        IntoIterator::into_iter(list)
    }

    fn has(events: &ServiceEvents) -> bool {
        !events.connects.is_empty()
    }
}

// ChannelErrorEvent
/// A Channel failed and has been removed. Reported once per Channel.
pub struct ChannelErrorEvent;
impl ServiceEvent for ChannelErrorEvent {
    type Iter = IntoIter<(ConnectionId, ErrorCode)>;

    fn iter(events: &mut ServiceEvents) -> Self::Iter {
        let list = mem::take(&mut events.errors);
        IntoIterator::into_iter(list)
    }

    fn has(events: &ServiceEvents) -> bool {
        !events.errors.is_empty()
    }
}

// FrameEvent
pub struct FrameEvent;
impl ServiceEvent for FrameEvent {
    type Iter = IntoIter<(ConnectionId, Frame)>;

    fn iter(events: &mut ServiceEvents) -> Self::Iter {
        let list = mem::take(&mut events.frames);
        IntoIterator::into_iter(list)
    }

    fn has(events: &ServiceEvents) -> bool {
        !events.frames.is_empty()
    }
}
