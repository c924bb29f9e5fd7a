use std::{net::SocketAddr, sync::Arc};

use courier_service::{
    shared::{Address, ServiceKind},
    transport::{TcpConfig, UdpConfig, WebSocketConfig},
    Dispatcher, Endpoint, Node, NodeConfig, ServiceConfig, TransportConfig,
};

use crate::test_protocol::protocol;

/// The wire transports every loopback scenario runs over
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    Udp,
    Tcp,
    WebSocket,
}

impl TransportKind {
    pub const ALL: [TransportKind; 3] = [
        TransportKind::Udp,
        TransportKind::Tcp,
        TransportKind::WebSocket,
    ];

    pub fn config(&self) -> TransportConfig {
        match self {
            TransportKind::Udp => TransportConfig::Udp(UdpConfig {
                outbound_bind: SocketAddr::from(([127, 0, 0, 1], 0)),
                ..Default::default()
            }),
            TransportKind::Tcp => TransportConfig::Tcp(TcpConfig::default()),
            TransportKind::WebSocket => TransportConfig::WebSocket(WebSocketConfig::default()),
        }
    }

    /// How a client reaches a server listening on `addr`
    pub fn endpoint(&self, addr: SocketAddr) -> Endpoint {
        match self {
            TransportKind::WebSocket => Endpoint::Url(format!("ws://{}/", addr)),
            _ => Endpoint::Socket(addr),
        }
    }
}

fn loopback() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

/// A Node with full control over its configuration
pub fn node_with(
    transport: TransportConfig,
    kind: ServiceKind,
    listen: bool,
    address: Address,
    dispatcher: Dispatcher,
) -> Node {
    let config = NodeConfig {
        service: ServiceConfig {
            kind,
            transport,
            listen: listen.then(loopback),
            worker_threads: 1,
            ..Default::default()
        },
        address,
    };
    Node::new(config, Arc::new(dispatcher)).expect("node should start on loopback")
}

/// Client-facing Node listening on an ephemeral loopback port
pub fn server_node(transport: TransportKind, dispatcher: Dispatcher) -> Node {
    node_with(
        transport.config(),
        ServiceKind::Outer,
        true,
        Address::new(1, 0),
        dispatcher,
    )
}

/// Outbound-only client Node without handlers
pub fn client_node(transport: TransportKind) -> Node {
    node_with(
        transport.config(),
        ServiceKind::Outer,
        false,
        Address::new(100, 0),
        Dispatcher::new(protocol()),
    )
}

/// Process-to-process Node listening on loopback under `address`
pub fn inner_node(transport: TransportKind, address: Address, dispatcher: Dispatcher) -> Node {
    node_with(
        transport.config(),
        ServiceKind::Inner,
        true,
        address,
        dispatcher,
    )
}
