use std::marker::PhantomData;

use courier_shared::{
    ActorId, ConnectionId, CorrelationId, ErrorCode, ErrorPayload, Frame, Message, Opcode,
    Poster,
};

use crate::error::HandlerError;

/// A reply produced after the handler returned. Applied on the owning
/// thread during the next pump.
pub(crate) struct DeferredReply {
    pub connection_id: ConnectionId,
    pub session_instance: u64,
    pub frame: Frame,
}

/// Answers one request later, from any thread. A reply whose Session has
/// been replaced or reset by then is discarded.
///
/// Dropping a Responder without answering fails the request with
/// [`ErrorCode::HandlerFailed`].
pub struct Responder<R: Message> {
    connection_id: ConnectionId,
    session_instance: u64,
    opcode: Opcode,
    correlation_id: CorrelationId,
    actor_id: ActorId,
    replies: Poster<DeferredReply>,
    answered: bool,
    phantom_r: PhantomData<fn(R)>,
}

impl<R: Message> Responder<R> {
    pub(crate) fn new(
        connection_id: ConnectionId,
        session_instance: u64,
        request: &Frame,
        replies: Poster<DeferredReply>,
    ) -> Self {
        Self {
            connection_id,
            session_instance,
            opcode: request.opcode(),
            correlation_id: request.correlation_id(),
            actor_id: request.actor_id(),
            replies,
            answered: request.is_one_way(),
            phantom_r: PhantomData,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn respond(mut self, response: &R) {
        let frame = Frame::response(
            self.opcode,
            self.correlation_id,
            self.actor_id,
            response.to_payload(),
        );
        self.post(frame);
    }

    /// Answers with an error response instead
    pub fn fail(mut self, error: HandlerError) {
        self.post_error(error.error_code(), error.to_string());
    }

    fn post_error(&mut self, code: ErrorCode, message: String) {
        let payload = ErrorPayload::new(code, message);
        let frame =
            Frame::error_response(self.opcode, self.correlation_id, self.actor_id, &payload);
        self.post(frame);
    }

    fn post(&mut self, frame: Frame) {
        self.answered = true;
        self.replies.post(DeferredReply {
            connection_id: self.connection_id,
            session_instance: self.session_instance,
            frame,
        });
    }
}

impl<R: Message> Drop for Responder<R> {
    fn drop(&mut self) {
        if !self.answered {
            self.post_error(
                ErrorCode::HandlerFailed,
                "request dropped without a reply".to_string(),
            );
        }
    }
}
