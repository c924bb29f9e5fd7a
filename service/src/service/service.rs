use std::{collections::HashMap, mem, net::SocketAddr, time::Duration};

use log::{debug, info, warn};
use tokio::runtime::{Builder, Runtime};
use tokio_util::sync::CancellationToken;

use courier_shared::{
    ConfinementQueue, ConnectionId, ErrorCode, Frame, HeaderWidth, Reliability, ServiceKind,
};

use crate::{
    channel::Channel,
    error::ServiceError,
    events::ServiceEvents,
    transport::{
        self, ConnectionIdGenerator, Endpoint, Transport, TransportContext, TransportEvent,
    },
    ServiceConfig,
};

/// Anything frames can be sent through by connection id
pub trait FrameSink {
    fn send_frame(&mut self, id: ConnectionId, frame: &Frame) -> Result<(), ServiceError>;
}

/// Owns one transport, the table of live Channels and the runtime their I/O
/// runs on. All Channel state is mutated on the thread that created the
/// Service, inside [`Service::pump`] and the calls made from it.
pub struct Service {
    config: ServiceConfig,
    width: HeaderWidth,
    // None once disposed
    runtime: Option<Runtime>,
    transport: Box<dyn Transport>,
    queue: ConfinementQueue<TransportEvent>,
    channels: HashMap<ConnectionId, Channel>,
    endpoints: HashMap<Endpoint, ConnectionId>,
    ids: ConnectionIdGenerator,
    shutdown: CancellationToken,
    incoming_events: ServiceEvents,
    disposed: bool,
}

impl Service {
    /// Starts the runtime and the configured transport. When
    /// `config.listen` is set the listener is bound before this returns.
    pub fn create(config: ServiceConfig) -> Result<Self, ServiceError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .thread_name("courier-io")
            .enable_all()
            .build()
            .map_err(|error| ServiceError::Runtime {
                reason: error.to_string(),
            })?;

        let queue = ConfinementQueue::new();
        let ids = ConnectionIdGenerator::new();
        let shutdown = CancellationToken::new();
        let context = TransportContext {
            handle: runtime.handle().clone(),
            events: queue.poster(),
            ids: ids.clone(),
            shutdown: shutdown.clone(),
        };
        let transport = match transport::open(&config.transport, config.listen, context) {
            Ok(transport) => transport,
            Err(error) => {
                runtime.shutdown_background();
                return Err(error);
            }
        };
        info!(
            "{} service started, {:?}, listening on {:?}",
            transport.name(),
            config.kind,
            transport.local_addr()
        );

        Ok(Self {
            width: config.kind.header_width(),
            config,
            runtime: Some(runtime),
            transport,
            queue,
            channels: HashMap::new(),
            endpoints: HashMap::new(),
            ids,
            shutdown,
            incoming_events: ServiceEvents::new(),
            disposed: false,
        })
    }

    pub fn kind(&self) -> ServiceKind {
        self.config.kind
    }

    pub fn header_width(&self) -> HeaderWidth {
        self.width
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Address the listener (or the UDP socket) is bound to
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Makes the calling thread the one allowed to pump this Service
    pub fn claim_thread(&mut self) {
        self.queue.claim();
    }

    // Channels

    /// Returns the Channel already open to `endpoint`, or starts a new
    /// outbound one
    pub fn get_or_create_channel(
        &mut self,
        endpoint: impl Into<Endpoint>,
    ) -> Result<&mut Channel, ServiceError> {
        if self.disposed {
            return Err(ServiceError::Disposed);
        }
        let endpoint = endpoint.into();

        let id = match self.endpoints.get(&endpoint) {
            Some(id) if self.channels.contains_key(id) => *id,
            _ => {
                let id = self.ids.generate();
                let link = self.transport.connect(id, &endpoint)?;
                debug!("{} connecting to {}", id, endpoint);
                let channel = Channel::outbound(
                    id,
                    endpoint.clone(),
                    link,
                    self.width,
                    self.config.max_packet_size,
                );
                self.channels.insert(id, channel);
                self.endpoints.insert(endpoint, id);
                id
            }
        };

        self.channels
            .get_mut(&id)
            .ok_or(ServiceError::ChannelNotFound { id })
    }

    pub fn channel(&self, id: ConnectionId) -> Option<&Channel> {
        self.channels.get(&id)
    }

    pub fn channel_mut(&mut self, id: ConnectionId) -> Option<&mut Channel> {
        self.channels.get_mut(&id)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel_ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.channels.keys().copied()
    }

    /// Sends `frame` reliably and in order on the Channel `id`
    pub fn send(&mut self, id: ConnectionId, frame: &Frame) -> Result<(), ServiceError> {
        self.send_with(id, frame, Reliability::ReliableOrdered)
    }

    pub fn send_with(
        &mut self,
        id: ConnectionId,
        frame: &Frame,
        reliability: Reliability,
    ) -> Result<(), ServiceError> {
        let channel = self
            .channels
            .get_mut(&id)
            .ok_or(ServiceError::ChannelNotFound { id })?;
        channel.send_with(frame, reliability)
    }

    /// Disposes and forgets the Channel. Unknown ids are ignored.
    pub fn remove(&mut self, id: ConnectionId) {
        if let Some(mut channel) = self.channels.remove(&id) {
            channel.dispose();
            self.forget_endpoint(&channel);
        }
    }

    // Scheduling

    /// Applies every transport event posted since the last pump and returns
    /// what happened. Must run on the thread that owns the Service.
    pub fn pump(&mut self) -> Result<ServiceEvents, ServiceError> {
        if self.disposed {
            return Ok(ServiceEvents::new());
        }

        let mut posted = Vec::new();
        self.queue.drain(|event| posted.push(event))?;
        for event in posted {
            self.apply(event);
        }

        Ok(mem::replace(&mut self.incoming_events, ServiceEvents::new()))
    }

    /// Blocks until a transport event is waiting or `timeout` elapses
    pub fn wait_for_activity(&self, timeout: Duration) -> Result<bool, ServiceError> {
        Ok(self.queue.wait_for_activity(timeout)?)
    }

    fn apply(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Accepted { id, remote, mut link } => {
                if self.disposed {
                    link.close();
                    return;
                }
                info!("{} accepted from {}", id, remote);
                let channel = Channel::accepted(
                    id,
                    remote,
                    link,
                    self.width,
                    self.config.max_packet_size,
                );
                self.channels.insert(id, channel);
                self.incoming_events.push_accept(id, remote);
            }
            TransportEvent::Connected { id } => {
                if let Some(channel) = self.channels.get_mut(&id) {
                    if channel.on_connected() {
                        info!("{} connected", id);
                        self.incoming_events.push_connect(id);
                    }
                }
            }
            TransportEvent::Received { id, bytes } => {
                let Some(channel) = self.channels.get_mut(&id) else {
                    return;
                };
                let mut frames = Vec::new();
                let result = channel.on_received(bytes, &mut frames);
                for frame in frames {
                    self.incoming_events.push_frame(id, frame);
                }
                if let Err(code) = result {
                    self.fail_channel(id, code);
                }
            }
            TransportEvent::SendComplete { id } => {
                if let Some(channel) = self.channels.get_mut(&id) {
                    channel.on_send_complete();
                }
            }
            TransportEvent::Failed { id, code } => self.fail_channel(id, code),
            TransportEvent::AcceptFailed { reason } => {
                warn!("accept failed, still listening: {}", reason);
            }
        }
    }

    fn fail_channel(&mut self, id: ConnectionId, code: ErrorCode) {
        // only the first failure of a Channel is reported
        let Some(mut channel) = self.channels.remove(&id) else {
            return;
        };
        info!("{} failed: {}", id, code);
        channel.dispose();
        self.forget_endpoint(&channel);
        self.incoming_events.push_error(id, code);
    }

    fn forget_endpoint(&mut self, channel: &Channel) {
        if let Some(endpoint) = channel.endpoint() {
            if self.endpoints.get(endpoint) == Some(&channel.id()) {
                self.endpoints.remove(endpoint);
            }
        }
    }

    /// Disposes every Channel, then stops the transport and the runtime.
    /// Calling it again does nothing.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        debug!("disposing service with {} channel(s)", self.channels.len());

        for (_, mut channel) in self.channels.drain() {
            channel.dispose();
        }
        self.endpoints.clear();
        self.transport.shutdown();
        self.shutdown.cancel();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl FrameSink for Service {
    fn send_frame(&mut self, id: ConnectionId, frame: &Frame) -> Result<(), ServiceError> {
        self.send(id, frame)
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        self.dispose();
    }
}
