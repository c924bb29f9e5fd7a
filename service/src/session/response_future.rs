use std::{
    future::Future,
    marker::PhantomData,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::sync::oneshot::{self, error::TryRecvError};

use courier_shared::{CorrelationId, ErrorPayload, Frame, Message};

use crate::error::RpcError;

/// Resolves with the typed response to one call. Awaitable on any executor,
/// or polled from a game loop with [`ResponseFuture::try_take`].
pub struct ResponseFuture<R: Message> {
    correlation_id: CorrelationId,
    receiver: oneshot::Receiver<Result<Frame, RpcError>>,
    phantom_r: PhantomData<fn() -> R>,
}

impl<R: Message> ResponseFuture<R> {
    pub(crate) fn new(
        correlation_id: CorrelationId,
        receiver: oneshot::Receiver<Result<Frame, RpcError>>,
    ) -> Self {
        Self {
            correlation_id,
            receiver,
            phantom_r: PhantomData,
        }
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Returns the outcome if the call has resolved, without blocking.
    /// Returns `None` while the call is still pending.
    pub fn try_take(&mut self) -> Option<Result<R, RpcError>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(decode_response(result)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(RpcError::ChannelClosed)),
        }
    }
}

impl<R: Message> Future for ResponseFuture<R> {
    type Output = Result<R, RpcError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(decode_response(result)),
            // the Session went away without resolving the entry
            Poll::Ready(Err(_)) => Poll::Ready(Err(RpcError::ChannelClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

fn decode_response<R: Message>(result: Result<Frame, RpcError>) -> Result<R, RpcError> {
    let frame = result?;
    if frame.is_error() {
        let error = ErrorPayload::decode(frame.payload())?;
        return Err(RpcError::Remote {
            code: error.code,
            message: error.message,
        });
    }
    Ok(R::decode(frame.payload())?)
}
