use std::{collections::HashMap, time::Duration};

use log::{debug, trace};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use courier_shared::{ActorId, ConnectionId, CorrelationId, Frame, Message, Request};

use super::{
    pending::{Completion, PendingRequest, RelayTarget},
    ResponseFuture,
};
use crate::{error::{RpcError, ServiceError}, service::FrameSink};

/// What a Session decided about an incoming frame
#[derive(Debug)]
pub enum Incoming {
    /// A response resolved a local call
    Resolved,
    /// Unmatched, late or canceled response
    Dropped,
    /// A response to a forwarded request, to be sent back to its origin
    Relay { target: RelayTarget, frame: Frame },
    /// A request or one-way message for the dispatcher
    Dispatch(Frame),
}

/// Request/response correlation on top of one Channel
pub struct Session {
    connection_id: ConnectionId,
    instance_id: u64,
    next_correlation: CorrelationId,
    pending: HashMap<CorrelationId, PendingRequest>,
    disposed: bool,
}

impl Session {
    /// `instance_id` distinguishes this Session from any earlier one on the
    /// same connection id
    pub fn new(connection_id: ConnectionId, instance_id: u64) -> Self {
        Self {
            connection_id,
            instance_id,
            next_correlation: 1,
            pending: HashMap::new(),
            disposed: false,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, correlation_id: CorrelationId) -> bool {
        self.pending.contains_key(&correlation_id)
    }

    /// How long the call has been waiting
    pub fn pending_age(&self, correlation_id: CorrelationId) -> Option<Duration> {
        self.pending
            .get(&correlation_id)
            .map(|pending| pending.issued_at.elapsed())
    }

    // Sending

    /// Sends a one-way message
    pub fn send<M: Message, S: FrameSink + ?Sized>(
        &mut self,
        sink: &mut S,
        message: &M,
    ) -> Result<(), ServiceError> {
        self.send_frame(sink, &Frame::message(M::opcode(), message.to_payload()))
    }

    pub fn send_frame<S: FrameSink + ?Sized>(
        &mut self,
        sink: &mut S,
        frame: &Frame,
    ) -> Result<(), ServiceError> {
        if self.disposed {
            return Err(ServiceError::ChannelDisposed {
                id: self.connection_id,
            });
        }
        sink.send_frame(self.connection_id, frame)
    }

    /// Sends `request` and returns a future for its response
    pub fn call<Q: Request, S: FrameSink + ?Sized>(
        &mut self,
        sink: &mut S,
        request: &Q,
    ) -> Result<ResponseFuture<Q::Response>, ServiceError> {
        self.call_with(sink, request, ActorId::NONE, None)
    }

    /// Like [`Session::call`], but canceling `token` resolves the call with
    /// `RpcError::Canceled` on the next sweep
    pub fn call_with_cancel<Q: Request, S: FrameSink + ?Sized>(
        &mut self,
        sink: &mut S,
        request: &Q,
        token: CancellationToken,
    ) -> Result<ResponseFuture<Q::Response>, ServiceError> {
        self.call_with(sink, request, ActorId::NONE, Some(token))
    }

    pub fn call_with<Q: Request, S: FrameSink + ?Sized>(
        &mut self,
        sink: &mut S,
        request: &Q,
        actor_id: ActorId,
        token: Option<CancellationToken>,
    ) -> Result<ResponseFuture<Q::Response>, ServiceError> {
        if self.disposed {
            return Err(ServiceError::ChannelDisposed {
                id: self.connection_id,
            });
        }
        let correlation_id = self.allocate_correlation();
        let frame = Frame::request(Q::opcode(), correlation_id, request.to_payload())
            .with_actor(actor_id);

        // send first so a failed send leaves no pending entry behind
        sink.send_frame(self.connection_id, &frame)?;

        let (sender, receiver) = oneshot::channel();
        self.pending.insert(
            correlation_id,
            PendingRequest::new(Completion::Local(sender), token),
        );
        trace!(
            "{} call {} ({}) pending",
            self.connection_id,
            correlation_id,
            Q::name()
        );
        Ok(ResponseFuture::new(correlation_id, receiver))
    }

    /// Forwards a request received elsewhere. The response is handed back
    /// as [`Incoming::Relay`] carrying `origin`.
    pub(crate) fn relay<S: FrameSink + ?Sized>(
        &mut self,
        sink: &mut S,
        frame: &Frame,
        origin: RelayTarget,
    ) -> Result<(), ServiceError> {
        if self.disposed {
            return Err(ServiceError::ChannelDisposed {
                id: self.connection_id,
            });
        }
        let correlation_id = self.allocate_correlation();
        sink.send_frame(self.connection_id, &frame.with_correlation(correlation_id))?;
        self.pending.insert(
            correlation_id,
            PendingRequest::new(Completion::Relay(origin), None),
        );
        Ok(())
    }

    // Receiving

    pub fn receive(&mut self, frame: Frame) -> Incoming {
        if self.disposed {
            return Incoming::Dropped;
        }
        if !frame.is_response() {
            return Incoming::Dispatch(frame);
        }

        let Some(pending) = self.pending.remove(&frame.correlation_id()) else {
            trace!(
                "{} dropping response to unknown call {}",
                self.connection_id,
                frame.correlation_id()
            );
            return Incoming::Dropped;
        };
        match pending.completion {
            Completion::Local(sender) => {
                // the caller may have dropped its future
                let _ = sender.send(Ok(frame));
                Incoming::Resolved
            }
            Completion::Relay(target) => Incoming::Relay { target, frame },
        }
    }

    // Cancellation

    /// Removes the call and resolves it with `Canceled`. Returns whether
    /// the call was pending.
    pub fn cancel(&mut self, correlation_id: CorrelationId) -> bool {
        match self.pending.remove(&correlation_id) {
            Some(pending) => {
                debug!("{} call {} canceled", self.connection_id, correlation_id);
                pending.fail(RpcError::Canceled);
                true
            }
            None => false,
        }
    }

    /// Cancels every call whose token has been canceled
    pub fn sweep_canceled(&mut self) -> usize {
        let canceled: Vec<CorrelationId> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.is_canceled())
            .map(|(correlation_id, _)| *correlation_id)
            .collect();
        for correlation_id in &canceled {
            self.cancel(*correlation_id);
        }
        canceled.len()
    }

    /// Resolves every pending call with `ChannelClosed`. Returns the
    /// forwarded requests whose origins still need an answer. Calling it
    /// again does nothing.
    pub fn dispose(&mut self) -> Vec<RelayTarget> {
        if self.disposed {
            return Vec::new();
        }
        self.disposed = true;
        debug!(
            "{} session disposed with {} pending call(s)",
            self.connection_id,
            self.pending.len()
        );
        self.pending
            .drain()
            .filter_map(|(_, pending)| pending.fail(RpcError::ChannelClosed))
            .collect()
    }

    /// Ids run from 1 to `i32::MAX`, wrap, and skip ids still pending
    fn allocate_correlation(&mut self) -> CorrelationId {
        loop {
            let candidate = self.next_correlation;
            self.next_correlation = if candidate == CorrelationId::MAX {
                1
            } else {
                candidate + 1
            };
            if !self.pending.contains_key(&candidate) {
                return candidate;
            }
        }
    }
}
