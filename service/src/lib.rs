//! # Courier Service
//! A transport-agnostic network service: framed messages over reliable UDP,
//! TCP or WebSocket, request/response correlation per connection, and
//! routing of actor-addressed frames between processes.

#![deny(
    trivial_casts,
    trivial_numeric_casts,
    unstable_features,
    unused_import_braces
)]

#[macro_use]
extern crate cfg_if;

#[cfg(not(any(
    feature = "transport_udp",
    feature = "transport_tcp",
    feature = "transport_websocket"
)))]
compile_error!("courier-service requires at least one transport feature");

pub mod transport;
pub mod shared {
    pub use courier_shared::{
        ActionPoster, ActorId, Address, Bytes, ConnectionId, CorrelationId, ErrorCode,
        ErrorPayload, Frame, HeaderWidth, Message, MessageKind, MessageKinds, MessageRole, Opcode, Protocol,
        ProtocolPlugin, Reliability, Request, ServiceKind,
    };
}

mod channel;
mod dispatcher;
mod error;
mod events;
mod node;
mod router;
mod service;
mod session;

pub use channel::{Channel, ChannelState};
pub use dispatcher::{Dispatcher, HandlerContext, HandlerOutcome, Responder};
pub use error::{DispatcherError, HandlerError, NodeError, RouteError, RpcError, ServiceError};
pub use events::{
    AcceptEvent, ChannelErrorEvent, ConnectEvent, FrameEvent, ServiceEvent, ServiceEvents,
};
pub use node::{Node, NodeConfig, NodeEvent, NodeEvents, SessionClosedEvent, SessionOpenedEvent};
pub use router::{Route, Router};
pub use service::{FrameSink, Service, ServiceConfig};
pub use session::{Incoming, RelayTarget, ResponseFuture, Session};
pub use transport::{Endpoint, TransportConfig};

pub use tokio_util::sync::CancellationToken;
