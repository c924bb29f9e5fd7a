use std::time::Instant;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use courier_shared::{ActorId, ConnectionId, CorrelationId, Frame, Opcode};

use crate::error::RpcError;

/// Where a forwarded request came from, so its response can be sent back
/// under the original correlation id
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelayTarget {
    pub connection_id: ConnectionId,
    pub session_instance: u64,
    pub opcode: Opcode,
    pub correlation_id: CorrelationId,
    pub actor_id: ActorId,
}

pub(crate) enum Completion {
    /// A local caller waiting on a ResponseFuture
    Local(oneshot::Sender<Result<Frame, RpcError>>),
    /// A request forwarded on behalf of another Session
    Relay(RelayTarget),
}

pub(crate) struct PendingRequest {
    pub completion: Completion,
    pub issued_at: Instant,
    pub cancel: Option<CancellationToken>,
}

impl PendingRequest {
    pub fn new(completion: Completion, cancel: Option<CancellationToken>) -> Self {
        Self {
            completion,
            issued_at: Instant::now(),
            cancel,
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel
            .as_ref()
            .map_or(false, |token| token.is_cancelled())
    }

    /// Resolves a local caller with `error`. Relay entries are returned so
    /// the caller can answer the original requester.
    pub fn fail(self, error: RpcError) -> Option<RelayTarget> {
        match self.completion {
            Completion::Local(sender) => {
                // the caller may have dropped its future
                let _ = sender.send(Err(error));
                None
            }
            Completion::Relay(target) => Some(target),
        }
    }
}
