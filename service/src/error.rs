use std::net::SocketAddr;

use thiserror::Error;

use courier_shared::{
    ActorId, Address, CodecError, ConfinementError, ConnectionId, ErrorCode, FramingError,
    Opcode,
};

/// Errors surfaced by a Service or one of its Channels
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Listener could not be bound; fatal at creation
    #[error("Failed to bind {transport} listener on {addr}: {reason}")]
    Bind {
        transport: &'static str,
        addr: SocketAddr,
        reason: String,
    },

    /// The I/O runtime could not be started
    #[error("Failed to start the I/O runtime: {reason}")]
    Runtime { reason: String },

    /// The endpoint cannot be reached over the configured transport
    #[error("Endpoint {endpoint} is not usable with the {transport} transport")]
    UnsupportedEndpoint {
        endpoint: String,
        transport: &'static str,
    },

    /// Send on a Channel that has already been disposed
    #[error("Channel {id} has been disposed. Sends after dispose are rejected")]
    ChannelDisposed { id: ConnectionId },

    /// No live Channel carries this id
    #[error("No live channel with id {id}")]
    ChannelNotFound { id: ConnectionId },

    /// Encoded frame is above the configured maximum packet size
    #[error("Encoded frame of {size} bytes exceeds the maximum packet size of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    /// Operation on a Service that has been disposed
    #[error("Service has been disposed")]
    Disposed,

    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("Confinement error: {0}")]
    Confinement(#[from] ConfinementError),
}

/// How a pending call resolved when it did not produce a response
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// The Session was disposed before a response arrived
    #[error("Channel closed before the response arrived")]
    ChannelClosed,

    /// The call was canceled locally
    #[error("Call was canceled")]
    Canceled,

    /// The remote handler answered with an error response
    #[error("Remote returned {code}: {message}")]
    Remote { code: ErrorCode, message: String },

    /// The response payload could not be decoded
    #[error("Failed to decode response: {0}")]
    Decode(#[from] CodecError),

    /// The error response itself was malformed
    #[error("Malformed error response: {0}")]
    Framing(#[from] FramingError),
}

impl RpcError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            RpcError::ChannelClosed => ErrorCode::ChannelClosed,
            RpcError::Canceled => ErrorCode::Canceled,
            RpcError::Remote { code, .. } => *code,
            RpcError::Decode(_) | RpcError::Framing(_) => ErrorCode::MalformedFrame,
        }
    }
}

/// Errors produced while resolving an ActorId
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// Instance id 0 never names an actor
    #[error("ActorId {actor} does not name an actor")]
    InvalidActor { actor: ActorId },

    /// Address is local but no actor is registered under the instance
    #[error("No local actor registered for {actor}")]
    ActorNotFound { actor: ActorId },

    /// Address is neither local nor mapped to an endpoint
    #[error("No route to address {address} for {actor}")]
    UnknownAddress { address: Address, actor: ActorId },

    /// Outbound actor sends require a remote target
    #[error("Actor {actor} lives in this process. Local actors are reached directly, not through the network")]
    LocalTarget { actor: ActorId },
}

/// Failure returned by a request handler. Becomes an error-flagged response
/// carrying the request's correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("Handler failed: {message}")]
    Failed { message: String },

    /// Application-chosen error code
    #[error("Handler rejected request with {code}: {message}")]
    Rejected { code: ErrorCode, message: String },

    #[error("Failed to decode request: {0}")]
    Decode(#[from] CodecError),

    #[error("{0}")]
    Route(#[from] RouteError),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed {
            message: message.into(),
        }
    }

    pub fn rejected(code: ErrorCode, message: impl Into<String>) -> Self {
        HandlerError::Rejected {
            code,
            message: message.into(),
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            HandlerError::Failed { .. } => ErrorCode::HandlerFailed,
            HandlerError::Rejected { code, .. } => *code,
            HandlerError::Decode(_) => ErrorCode::MalformedFrame,
            HandlerError::Route(RouteError::LocalTarget { .. }) => ErrorCode::HandlerFailed,
            HandlerError::Route(_) => ErrorCode::ActorNotFound,
        }
    }
}

/// Errors raised while registering handlers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatcherError {
    /// Opcode is not part of the Protocol
    #[error("Cannot register a handler for {name} (opcode {opcode}): it is not registered with the Protocol")]
    NotInProtocol { opcode: Opcode, name: &'static str },

    /// A handler already exists for the opcode
    #[error("A handler for {name} (opcode {opcode}) is already registered")]
    DuplicateHandler { opcode: Opcode, name: &'static str },
}

/// Errors returned by the Node facade
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    #[error("{0}")]
    Service(#[from] ServiceError),

    #[error("Routing failed: {0}")]
    Route(#[from] RouteError),

    /// No Session is attached to the connection
    #[error("No session for connection {id}")]
    SessionNotFound { id: ConnectionId },
}
