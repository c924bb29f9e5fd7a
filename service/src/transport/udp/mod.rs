//! Reliable UDP: a connection-oriented engine on one socket, with
//! per-message reliability and ordered delivery per sub-channel.

use std::{net::SocketAddr, time::Duration};

use log::info;
use tokio::sync::mpsc::{self, UnboundedSender};

use courier_shared::{ConnectionId, ErrorCode, SubChannel};

use super::{Endpoint, Link, LinkSend, Outgoing, Transport, TransportContext, TransportEvent};
use crate::error::ServiceError;

mod engine;
mod packet;
mod peer;
mod pool;

use engine::{Engine, EngineCommand};

const TRANSPORT_NAME: &str = "udp";

/// Channels send everything on this sub-channel
pub(crate) const MAIN_SUB_CHANNEL: SubChannel = 0;

// largest payload an IPv4 UDP datagram can carry
pub(crate) const MAX_RECEIVE_SIZE: usize = 65_507;

// UDP Configuration
#[derive(Clone, Debug)]
pub struct UdpConfig {
    /// How often the engine runs timers and resends
    pub tick_interval: Duration,
    pub syn_interval: Duration,
    /// Outbound connects unanswered for this long fail with `ConnectTimeout`
    pub connect_timeout: Duration,
    /// Accepted connections that send nothing after the ACK fail with
    /// `AcceptTimeout`
    pub accept_timeout: Duration,
    /// Connections silent for this long fail with `Timeout`
    pub idle_timeout: Duration,
    pub ping_interval: Duration,
    /// An outbound connection that hears nothing for this long sends
    /// RECONNECT instead of pings, so the remote can follow an address
    /// change
    pub reconnect_after: Duration,
    pub resend_interval: Duration,
    /// A reliable fragment resent this many times without an ack fails the
    /// connection with `Timeout`
    pub max_resends: u32,
    /// Unacknowledged reliable fragments allowed per sub-channel
    pub send_window: usize,
    /// Largest datagram the engine sends; longer reliable messages are
    /// fragmented
    pub max_datagram_size: usize,
    /// Largest message reassembled from fragments. A peer sending more
    /// fails with `MessageTooLarge`.
    pub max_message_size: usize,
    /// Receive buffers kept for reuse
    pub pooled_packets: usize,
    /// Local address for outbound-only services
    pub outbound_bind: SocketAddr,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(10),
            syn_interval: Duration::from_millis(250),
            connect_timeout: Duration::from_secs(10),
            accept_timeout: Duration::from_secs(20),
            idle_timeout: Duration::from_secs(30),
            ping_interval: Duration::from_secs(2),
            reconnect_after: Duration::from_secs(5),
            resend_interval: Duration::from_millis(100),
            max_resends: 20,
            send_window: 128,
            max_datagram_size: 1200,
            max_message_size: 64 * 1024,
            pooled_packets: 32,
            outbound_bind: SocketAddr::from(([0, 0, 0, 0], 0)),
        }
    }
}

impl UdpConfig {
    pub(crate) fn max_fragment_size(&self) -> usize {
        self.max_datagram_size
            .saturating_sub(packet::MSG_HEADER_LEN)
            .max(1)
    }
}

pub(crate) struct UdpTransport {
    context: TransportContext,
    commands: UnboundedSender<EngineCommand>,
    local_addr: Option<SocketAddr>,
}

impl UdpTransport {
    pub fn open(
        config: UdpConfig,
        listen: Option<SocketAddr>,
        context: TransportContext,
    ) -> Result<Self, ServiceError> {
        let addr = listen.unwrap_or(config.outbound_bind);
        let bind_error = |reason: String| ServiceError::Bind {
            transport: TRANSPORT_NAME,
            addr,
            reason,
        };

        let socket = std::net::UdpSocket::bind(addr).map_err(|e| bind_error(e.to_string()))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| bind_error(e.to_string()))?;
        let socket = {
            let _guard = context.handle.enter();
            tokio::net::UdpSocket::from_std(socket).map_err(|e| bind_error(e.to_string()))?
        };
        let local_addr = socket.local_addr().ok();
        if listen.is_some() {
            info!("UDP listener bound on {:?}", local_addr);
        }

        let (command_sender, command_receiver) = mpsc::unbounded_channel();
        let engine = Engine::new(
            socket,
            config,
            context.clone(),
            listen.is_some(),
            command_receiver,
            command_sender.clone(),
        );
        context.handle.spawn(engine.run());

        Ok(Self {
            context,
            commands: command_sender,
            local_addr,
        })
    }
}

impl Transport for UdpTransport {
    fn name(&self) -> &'static str {
        TRANSPORT_NAME
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn connect(
        &mut self,
        id: ConnectionId,
        endpoint: &Endpoint,
    ) -> Result<Box<dyn Link>, ServiceError> {
        let Endpoint::Socket(remote) = endpoint else {
            return Err(ServiceError::UnsupportedEndpoint {
                endpoint: endpoint.to_string(),
                transport: TRANSPORT_NAME,
            });
        };

        let local_conn = fastrand::u32(1..);
        let command = EngineCommand::Connect {
            id,
            local_conn,
            remote: *remote,
        };
        if self.commands.send(command).is_err() {
            self.context.events.post(TransportEvent::Failed {
                id,
                code: ErrorCode::ConnectFailed,
            });
        }
        Ok(Box::new(UdpLink::new(local_conn, self.commands.clone())))
    }

    fn shutdown(&mut self) {
        self.context.shutdown.cancel();
    }
}

/// Owner-side handle of one engine connection. Sends are handed to the
/// engine without waiting for completion.
pub(crate) struct UdpLink {
    local_conn: u32,
    commands: UnboundedSender<EngineCommand>,
    closed: bool,
}

impl UdpLink {
    fn new(local_conn: u32, commands: UnboundedSender<EngineCommand>) -> Self {
        Self {
            local_conn,
            commands,
            closed: false,
        }
    }
}

impl Link for UdpLink {
    fn is_stream(&self) -> bool {
        false
    }

    fn send(&mut self, batch: Vec<Outgoing>) -> LinkSend {
        if self.closed {
            return LinkSend::Closed;
        }
        let command = EngineCommand::Send {
            local_conn: self.local_conn,
            batch,
        };
        match self.commands.send(command) {
            Ok(()) => LinkSend::Done,
            Err(_) => LinkSend::Closed,
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.commands.send(EngineCommand::Close {
            local_conn: self.local_conn,
        });
    }
}
