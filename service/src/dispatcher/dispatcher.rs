use std::{
    any::Any,
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use bytes::Bytes;
use log::{debug, error, warn};

use courier_shared::{ErrorCode, ErrorPayload, Frame, Message, Opcode, Protocol, Request};

use super::{HandlerContext, Responder};
use crate::error::{DispatcherError, HandlerError};

/// Result of running one erased handler
pub enum HandlerOutcome {
    /// One-way message handled
    NoReply,
    /// Encoded response payload
    Reply(Bytes),
    /// A Responder will answer later
    Deferred,
    Failed(HandlerError),
}

type ErasedHandler =
    Box<dyn Fn(&mut HandlerContext<'_>, &Frame) -> HandlerOutcome + Send + Sync + 'static>;

/// Opcode-indexed handler table. Built once, then shared as
/// `Arc<Dispatcher>`.
pub struct Dispatcher {
    protocol: Arc<Protocol>,
    handlers: HashMap<Opcode, ErasedHandler>,
}

impl Dispatcher {
    pub fn new(protocol: Arc<Protocol>) -> Self {
        Self {
            protocol,
            handlers: HashMap::new(),
        }
    }

    pub fn protocol(&self) -> &Arc<Protocol> {
        &self.protocol
    }

    pub fn has_handler(&self, opcode: Opcode) -> bool {
        self.handlers.contains_key(&opcode)
    }

    /// Registers a handler for the one-way message `M`
    pub fn on_message<M, F>(&mut self, handler: F) -> Result<&mut Self, DispatcherError>
    where
        M: Message,
        F: Fn(&mut HandlerContext<'_>, M) + Send + Sync + 'static,
    {
        self.register(
            M::opcode(),
            M::name(),
            erase(move |context, frame| match M::decode(frame.payload()) {
                Ok(message) => {
                    handler(context, message);
                    HandlerOutcome::NoReply
                }
                Err(error) => HandlerOutcome::Failed(error.into()),
            }),
        )
    }

    /// Registers a handler answering the request `Q` before it returns
    pub fn on_request<Q, F>(&mut self, handler: F) -> Result<&mut Self, DispatcherError>
    where
        Q: Request,
        F: Fn(&mut HandlerContext<'_>, Q) -> Result<Q::Response, HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.register(
            Q::opcode(),
            Q::name(),
            erase(move |context, frame| {
                let request = match Q::decode(frame.payload()) {
                    Ok(request) => request,
                    Err(error) => return HandlerOutcome::Failed(error.into()),
                };
                match handler(context, request) {
                    Ok(response) => HandlerOutcome::Reply(response.to_payload()),
                    Err(error) => HandlerOutcome::Failed(error),
                }
            }),
        )
    }

    /// Registers a handler answering the request `Q` later through a
    /// [`Responder`]
    pub fn on_request_deferred<Q, F>(&mut self, handler: F) -> Result<&mut Self, DispatcherError>
    where
        Q: Request,
        F: Fn(&mut HandlerContext<'_>, Q, Responder<Q::Response>) + Send + Sync + 'static,
    {
        self.register(
            Q::opcode(),
            Q::name(),
            erase(move |context, frame| {
                let request = match Q::decode(frame.payload()) {
                    Ok(request) => request,
                    Err(error) => return HandlerOutcome::Failed(error.into()),
                };
                let responder = context.responder::<Q::Response>(frame);
                handler(context, request, responder);
                HandlerOutcome::Deferred
            }),
        )
    }

    fn register(
        &mut self,
        opcode: Opcode,
        name: &'static str,
        handler: ErasedHandler,
    ) -> Result<&mut Self, DispatcherError> {
        if !self.protocol.message_kinds.contains(opcode) {
            return Err(DispatcherError::NotInProtocol { opcode, name });
        }
        if self.handlers.contains_key(&opcode) {
            return Err(DispatcherError::DuplicateHandler { opcode, name });
        }
        self.handlers.insert(opcode, handler);
        Ok(self)
    }

    /// Runs the handler for `frame` and returns the frame to send back, if
    /// any. Handler failures and panics become error responses carrying the
    /// request's correlation id; one-way messages never get a reply.
    pub(crate) fn dispatch(&self, context: &mut HandlerContext<'_>, frame: &Frame) -> Option<Frame> {
        let opcode = frame.opcode();
        let Some(handler) = self.handlers.get(&opcode) else {
            if frame.is_one_way() {
                debug!(
                    "{} no handler for message {} (opcode {}), dropped",
                    context.connection_id(),
                    self.protocol.message_kinds.name(opcode),
                    opcode
                );
                return None;
            }
            warn!(
                "{} no handler for request opcode {}",
                context.connection_id(),
                opcode
            );
            return Some(error_reply(
                frame,
                ErrorCode::UnknownOpcode,
                format!("No handler registered for opcode {}", opcode),
            ));
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(context, frame)));
        let reply = match outcome {
            Ok(HandlerOutcome::NoReply) | Ok(HandlerOutcome::Deferred) => None,
            Ok(HandlerOutcome::Reply(payload)) => Some(Frame::response(
                opcode,
                frame.correlation_id(),
                frame.actor_id(),
                payload,
            )),
            Ok(HandlerOutcome::Failed(handler_error)) => {
                warn!(
                    "{} handler for {} failed: {}",
                    context.connection_id(),
                    self.protocol.message_kinds.name(opcode),
                    handler_error
                );
                Some(error_reply(
                    frame,
                    handler_error.error_code(),
                    handler_error.to_string(),
                ))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    "{} handler for {} panicked: {}",
                    context.connection_id(),
                    self.protocol.message_kinds.name(opcode),
                    message
                );
                Some(error_reply(frame, ErrorCode::HandlerPanicked, message))
            }
        };

        if frame.is_one_way() {
            return None;
        }
        reply
    }
}

// pins the closure to the higher-ranked handler signature
fn erase<F>(handler: F) -> ErasedHandler
where
    F: Fn(&mut HandlerContext<'_>, &Frame) -> HandlerOutcome + Send + Sync + 'static,
{
    Box::new(handler)
}

pub(crate) fn error_reply(request: &Frame, code: ErrorCode, message: String) -> Frame {
    Frame::error_response(
        request.opcode(),
        request.correlation_id(),
        request.actor_id(),
        &ErrorPayload::new(code, message),
    )
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
