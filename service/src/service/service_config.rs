use std::{default::Default, net::SocketAddr};

use courier_shared::ServiceKind;

use crate::transport::TransportConfig;

/// Contains Config properties which will be used by a Service
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// Selects the frame header width. `Outer` services talk to clients,
    /// `Inner` services carry actor addresses between processes.
    pub kind: ServiceKind,
    /// Wire transport and its settings
    pub transport: TransportConfig,
    /// Address to accept connections on. `None` makes the Service
    /// outbound-only.
    pub listen: Option<SocketAddr>,
    /// Largest encoded frame accepted in either direction
    pub max_packet_size: usize,
    /// Threads of the I/O runtime owned by the Service
    pub worker_threads: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            kind: ServiceKind::Outer,
            transport: TransportConfig::default(),
            listen: None,
            max_packet_size: 64 * 1024,
            worker_threads: 2,
        }
    }
}
