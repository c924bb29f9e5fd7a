//! Wire transports behind one contract.
//!
//! Every transport runs its I/O on the Service's tokio runtime and reports
//! back exclusively by posting [`TransportEvent`] values into the Service's
//! confinement queue. The Service's owning thread is the only place those
//! events are applied.

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use courier_shared::{ConnectionId, ErrorCode, Poster, Reliability};

use crate::error::ServiceError;

cfg_if! {
    if #[cfg(feature = "transport_udp")] {
        pub mod udp;
        pub use udp::UdpConfig;
    }
}

cfg_if! {
    if #[cfg(feature = "transport_tcp")] {
        pub mod tcp;
        pub use tcp::TcpConfig;
    }
}

cfg_if! {
    if #[cfg(feature = "transport_websocket")] {
        pub mod websocket;
        pub use websocket::WebSocketConfig;
    }
}

/// Where an outbound Channel connects to. Also the dedup key for outbound
/// Channels within one Service.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Socket(SocketAddr),
    /// `ws://host:port/path` for the WebSocket transport
    Url(String),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Socket(addr) => write!(f, "{}", addr),
            Endpoint::Url(url) => write!(f, "{}", url),
        }
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint::Socket(addr)
    }
}

/// Selects the wire transport and carries its settings
#[derive(Clone, Debug)]
pub enum TransportConfig {
    #[cfg(feature = "transport_udp")]
    Udp(UdpConfig),
    #[cfg(feature = "transport_tcp")]
    Tcp(TcpConfig),
    #[cfg(feature = "transport_websocket")]
    WebSocket(WebSocketConfig),
}

impl Default for TransportConfig {
    fn default() -> Self {
        cfg_if! {
            if #[cfg(feature = "transport_tcp")] {
                TransportConfig::Tcp(TcpConfig::default())
            } else if #[cfg(feature = "transport_udp")] {
                TransportConfig::Udp(UdpConfig::default())
            } else {
                TransportConfig::WebSocket(WebSocketConfig::default())
            }
        }
    }
}

/// Completion of transport I/O, posted from runtime tasks to the owner thread
pub(crate) enum TransportEvent {
    /// A listener produced a new connection
    Accepted {
        id: ConnectionId,
        remote: SocketAddr,
        link: Box<dyn Link>,
    },
    /// An outbound handshake finished
    Connected { id: ConnectionId },
    /// Bytes arrived. Whole packets for message transports, arbitrary
    /// chunks for stream transports.
    Received { id: ConnectionId, bytes: Bytes },
    /// The batch handed to [`Link::send`] has been written
    SendComplete { id: ConnectionId },
    /// The connection is unusable
    Failed { id: ConnectionId, code: ErrorCode },
    /// The listener failed one accept; accepting continues
    AcceptFailed { reason: String },
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::Accepted { id, remote, .. } => {
                write!(f, "Accepted({}, {})", id, remote)
            }
            TransportEvent::Connected { id } => write!(f, "Connected({})", id),
            TransportEvent::Received { id, bytes } => {
                write!(f, "Received({}, {} bytes)", id, bytes.len())
            }
            TransportEvent::SendComplete { id } => write!(f, "SendComplete({})", id),
            TransportEvent::Failed { id, code } => write!(f, "Failed({}, {})", id, code),
            TransportEvent::AcceptFailed { reason } => write!(f, "AcceptFailed({})", reason),
        }
    }
}

/// One packet handed to a Link
#[derive(Clone, Debug)]
pub(crate) struct Outgoing {
    pub bytes: Bytes,
    pub reliability: Reliability,
}

/// Result of handing a batch to a Link
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LinkSend {
    /// Accepted; the Link can take the next batch right away
    Done,
    /// In flight; wait for `TransportEvent::SendComplete` before the next batch
    Pending,
    /// The connection is gone
    Closed,
}

/// The owner-thread handle of one transport connection
pub(crate) trait Link: Send {
    /// Whether packets must be length-prefixed before they reach `send`
    fn is_stream(&self) -> bool;

    fn send(&mut self, batch: Vec<Outgoing>) -> LinkSend;

    /// Releases the native connection. Safe to call more than once.
    fn close(&mut self);
}

/// A listener/connector for one wire transport
pub(crate) trait Transport: Send {
    fn name(&self) -> &'static str;

    fn local_addr(&self) -> Option<SocketAddr>;

    /// Starts an outbound handshake and returns the new connection's Link.
    /// Completion is reported as `Connected` or `Failed`.
    fn connect(
        &mut self,
        id: ConnectionId,
        endpoint: &Endpoint,
    ) -> Result<Box<dyn Link>, ServiceError>;

    /// Stops accepting and tears down every task the transport spawned
    fn shutdown(&mut self);
}

/// Hands out process-unique connection ids, starting at 1
#[derive(Clone, Default)]
pub(crate) struct ConnectionIdGenerator {
    next: Arc<AtomicU64>,
}

impl ConnectionIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generate(&self) -> ConnectionId {
        ConnectionId::new(self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// What every transport needs from the Service that owns it
#[derive(Clone)]
pub(crate) struct TransportContext {
    pub handle: Handle,
    pub events: Poster<TransportEvent>,
    pub ids: ConnectionIdGenerator,
    pub shutdown: CancellationToken,
}

/// Binds (when `listen` is set) and starts the configured transport
pub(crate) fn open(
    config: &TransportConfig,
    listen: Option<SocketAddr>,
    context: TransportContext,
) -> Result<Box<dyn Transport>, ServiceError> {
    match config {
        #[cfg(feature = "transport_udp")]
        TransportConfig::Udp(udp_config) => {
            let transport = udp::UdpTransport::open(udp_config.clone(), listen, context)?;
            Ok(Box::new(transport))
        }
        #[cfg(feature = "transport_tcp")]
        TransportConfig::Tcp(tcp_config) => {
            let transport = tcp::TcpTransport::open(tcp_config.clone(), listen, context)?;
            Ok(Box::new(transport))
        }
        #[cfg(feature = "transport_websocket")]
        TransportConfig::WebSocket(ws_config) => {
            let transport =
                websocket::WebSocketTransport::open(ws_config.clone(), listen, context)?;
            Ok(Box::new(transport))
        }
    }
}

/// Binds a std listener synchronously so bind errors reach the caller, then
/// hands it to tokio
#[cfg(any(feature = "transport_tcp", feature = "transport_websocket"))]
pub(crate) fn bind_tcp_listener(
    transport: &'static str,
    addr: SocketAddr,
    handle: &Handle,
) -> Result<tokio::net::TcpListener, ServiceError> {
    let bind_error = |reason: String| ServiceError::Bind {
        transport,
        addr,
        reason,
    };
    let listener = std::net::TcpListener::bind(addr).map_err(|e| bind_error(e.to_string()))?;
    listener
        .set_nonblocking(true)
        .map_err(|e| bind_error(e.to_string()))?;
    let _guard = handle.enter();
    tokio::net::TcpListener::from_std(listener).map_err(|e| bind_error(e.to_string()))
}
