use std::any::Any;

use courier_shared::{ActorId, ConnectionId, Frame, Message, Poster, Request};

use super::{DeferredReply, Responder};
use crate::{error::ServiceError, session::ResponseFuture, Service, Session};

/// What a handler can reach while it runs: the Session the frame arrived
/// on, the Service, and the addressed actor when there is one
pub struct HandlerContext<'a> {
    connection_id: ConnectionId,
    actor_id: ActorId,
    session: &'a mut Session,
    service: &'a mut Service,
    actor: Option<&'a mut (dyn Any + Send + 'static)>,
    replies: Poster<DeferredReply>,
}

impl<'a> HandlerContext<'a> {
    pub(crate) fn new(
        actor_id: ActorId,
        session: &'a mut Session,
        service: &'a mut Service,
        actor: Option<&'a mut (dyn Any + Send + 'static)>,
        replies: Poster<DeferredReply>,
    ) -> Self {
        Self {
            connection_id: session.connection_id(),
            actor_id,
            session,
            service,
            actor,
            replies,
        }
    }

    /// Connection the frame arrived on
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Actor the frame was addressed to, `ActorId::NONE` otherwise
    pub fn actor_id(&self) -> ActorId {
        self.actor_id
    }

    /// The addressed local actor, if it is an `A`
    pub fn actor_mut<A: Any>(&mut self) -> Option<&mut A> {
        self.actor.as_deref_mut()?.downcast_mut::<A>()
    }

    pub fn service(&mut self) -> &mut Service {
        self.service
    }

    pub fn session(&mut self) -> &mut Session {
        self.session
    }

    /// Sends a one-way message back on the same connection
    pub fn send<M: Message>(&mut self, message: &M) -> Result<(), ServiceError> {
        self.session.send(&mut *self.service, message)
    }

    /// Calls the peer on the same connection
    pub fn call<Q: Request>(
        &mut self,
        request: &Q,
    ) -> Result<ResponseFuture<Q::Response>, ServiceError> {
        self.session.call(&mut *self.service, request)
    }

    pub(crate) fn responder<R: Message>(&self, request: &Frame) -> Responder<R> {
        Responder::new(
            self.connection_id,
            self.session.instance_id(),
            request,
            self.replies.clone(),
        )
    }
}
