use std::{collections::VecDeque, net::SocketAddr};

use bytes::{Bytes, BytesMut};
use log::{debug, trace};

use courier_shared::{
    ConnectionId, ErrorCode, Frame, HeaderWidth, PacketReassembler, Reliability,
};

use crate::{
    error::ServiceError,
    transport::{Endpoint, Link, LinkSend, Outgoing},
};

/// Lifecycle of a Channel. `Disposed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Created,
    Connected,
    Disposed,
}

/// One logical connection, identical over every transport. Frames sent
/// before the transport connects are queued and flushed in order.
pub struct Channel {
    id: ConnectionId,
    state: ChannelState,
    link: Box<dyn Link>,
    endpoint: Option<Endpoint>,
    remote_addr: Option<SocketAddr>,
    pending: VecDeque<Outgoing>,
    // a batch is in flight on the link
    sending: bool,
    reassembler: Option<PacketReassembler>,
    width: HeaderWidth,
    max_packet_size: usize,
}

impl Channel {
    /// A Channel whose handshake is still running
    pub(crate) fn outbound(
        id: ConnectionId,
        endpoint: Endpoint,
        link: Box<dyn Link>,
        width: HeaderWidth,
        max_packet_size: usize,
    ) -> Self {
        let remote_addr = match &endpoint {
            Endpoint::Socket(addr) => Some(*addr),
            Endpoint::Url(_) => None,
        };
        Self::new(
            id,
            ChannelState::Created,
            link,
            Some(endpoint),
            remote_addr,
            width,
            max_packet_size,
        )
    }

    /// A Channel produced by a listener, usable right away
    pub(crate) fn accepted(
        id: ConnectionId,
        remote_addr: SocketAddr,
        link: Box<dyn Link>,
        width: HeaderWidth,
        max_packet_size: usize,
    ) -> Self {
        Self::new(
            id,
            ChannelState::Connected,
            link,
            None,
            Some(remote_addr),
            width,
            max_packet_size,
        )
    }

    fn new(
        id: ConnectionId,
        state: ChannelState,
        link: Box<dyn Link>,
        endpoint: Option<Endpoint>,
        remote_addr: Option<SocketAddr>,
        width: HeaderWidth,
        max_packet_size: usize,
    ) -> Self {
        let reassembler = if link.is_stream() {
            Some(PacketReassembler::new(max_packet_size))
        } else {
            None
        };
        Self {
            id,
            state,
            link,
            endpoint,
            remote_addr,
            pending: VecDeque::new(),
            sending: false,
            reassembler,
            width,
            max_packet_size,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ChannelState::Connected
    }

    pub fn is_disposed(&self) -> bool {
        self.state == ChannelState::Disposed
    }

    /// The endpoint an outbound Channel was created for
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Encoded frames not yet handed to the transport
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Sends `frame` reliably and in order
    pub fn send(&mut self, frame: &Frame) -> Result<(), ServiceError> {
        self.send_with(frame, Reliability::ReliableOrdered)
    }

    /// Queues `frame` and flushes if connected. Never blocks.
    pub fn send_with(&mut self, frame: &Frame, reliability: Reliability) -> Result<(), ServiceError> {
        if self.is_disposed() {
            return Err(ServiceError::ChannelDisposed { id: self.id });
        }
        let bytes = frame.encode(self.width)?;
        if bytes.len() > self.max_packet_size {
            return Err(ServiceError::MessageTooLarge {
                size: bytes.len(),
                max: self.max_packet_size,
            });
        }

        self.pending.push_back(Outgoing { bytes, reliability });
        self.flush();
        Ok(())
    }

    /// Releases the native connection. Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.is_disposed() {
            return;
        }
        debug!("{} disposed with {} pending", self.id, self.pending.len());
        self.state = ChannelState::Disposed;
        self.pending.clear();
        self.reassembler = None;
        self.link.close();
    }

    /// Returns whether the Channel moved to `Connected`
    pub(crate) fn on_connected(&mut self) -> bool {
        if self.state != ChannelState::Created {
            return false;
        }
        self.state = ChannelState::Connected;
        self.flush();
        true
    }

    pub(crate) fn on_send_complete(&mut self) {
        self.sending = false;
        self.flush();
    }

    /// Turns received bytes into frames, appending them to `frames`. An
    /// error means the connection can no longer be trusted.
    pub(crate) fn on_received(&mut self, bytes: Bytes, frames: &mut Vec<Frame>) -> Result<(), ErrorCode> {
        if self.is_disposed() {
            return Ok(());
        }
        let width = self.width;

        let Some(reassembler) = self.reassembler.as_mut() else {
            if bytes.len() > self.max_packet_size {
                debug!(
                    "{} received a {} byte packet, limit is {}",
                    self.id,
                    bytes.len(),
                    self.max_packet_size
                );
                return Err(ErrorCode::MessageTooLarge);
            }
            let frame = Frame::decode(bytes, width).map_err(|error| {
                debug!("{} received a malformed frame: {}", self.id, error);
                error.error_code()
            })?;
            frames.push(frame);
            return Ok(());
        };

        reassembler.push(&bytes);
        loop {
            let packet = match reassembler.next_packet() {
                Ok(Some(packet)) => packet,
                Ok(None) => return Ok(()),
                Err(error) => {
                    debug!("{} stream framing failed: {}", self.id, error);
                    return Err(error.error_code());
                }
            };
            let frame = Frame::decode(packet, width).map_err(|error| {
                debug!("{} received a malformed frame: {}", self.id, error);
                error.error_code()
            })?;
            frames.push(frame);
        }
    }

    fn flush(&mut self) {
        if !self.is_connected() || self.sending || self.pending.is_empty() {
            return;
        }

        let batch: Vec<Outgoing> = if self.link.is_stream() {
            let mut buffer = BytesMut::new();
            for outgoing in self.pending.drain(..) {
                PacketReassembler::write_packet(&outgoing.bytes, &mut buffer);
            }
            vec![Outgoing {
                bytes: buffer.freeze(),
                reliability: Reliability::ReliableOrdered,
            }]
        } else {
            self.pending.drain(..).collect()
        };

        trace!("{} flushing {} packet(s)", self.id, batch.len());
        match self.link.send(batch) {
            LinkSend::Done => {}
            LinkSend::Pending => self.sending = true,
            // the transport reports the failure on its own
            LinkSend::Closed => debug!("{} link closed, batch dropped", self.id),
        }
    }
}
