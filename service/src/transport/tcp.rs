use std::{net::SocketAddr, time::Duration};

use bytes::{Bytes, BytesMut};
use log::{debug, info, trace, warn};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
};
use tokio_util::sync::CancellationToken;

use courier_shared::{ConnectionId, ErrorCode, Poster};

use super::{
    bind_tcp_listener, Endpoint, Link, LinkSend, Outgoing, Transport, TransportContext,
    TransportEvent,
};
use crate::error::ServiceError;

const TRANSPORT_NAME: &str = "tcp";

// TCP Configuration
#[derive(Clone, Debug)]
pub struct TcpConfig {
    /// Outbound connects that take longer fail with `ConnectTimeout`
    pub connect_timeout: Duration,
    /// Size of each socket read
    pub read_buffer_size: usize,
    pub nodelay: bool,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_buffer_size: 8 * 1024,
            nodelay: true,
        }
    }
}

pub(crate) struct TcpTransport {
    config: TcpConfig,
    context: TransportContext,
    local_addr: Option<SocketAddr>,
}

impl TcpTransport {
    pub fn open(
        config: TcpConfig,
        listen: Option<SocketAddr>,
        context: TransportContext,
    ) -> Result<Self, ServiceError> {
        let mut local_addr = None;
        if let Some(addr) = listen {
            let listener = bind_tcp_listener(TRANSPORT_NAME, addr, &context.handle)?;
            local_addr = listener.local_addr().ok();
            info!("TCP listener bound on {:?}", local_addr);
            context
                .handle
                .spawn(accept_loop(listener, config.clone(), context.clone()));
        }

        Ok(Self {
            config,
            context,
            local_addr,
        })
    }
}

impl Transport for TcpTransport {
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
        let remote = *remote;

        let (batch_sender, batch_receiver) = mpsc::unbounded_channel();
        let cancel = self.context.shutdown.child_token();
        let config = self.config.clone();
        let events = self.context.events.clone();
        let task_cancel = cancel.clone();

        self.context.handle.spawn(async move {
            let connect = tokio::time::timeout(config.connect_timeout, TcpStream::connect(remote));
            let result = tokio::select! {
                _ = task_cancel.cancelled() => return,
                result = connect => result,
            };
            match result {
                Ok(Ok(stream)) => {
                    debug!("{} connected to {}", id, remote);
                    events.post(TransportEvent::Connected { id });
                    run_stream(stream, id, &config, events, batch_receiver, task_cancel).await;
                }
                Ok(Err(error)) => {
                    warn!("{} failed to connect to {}: {}", id, remote, error);
                    events.post(TransportEvent::Failed {
                        id,
                        code: ErrorCode::ConnectFailed,
                    });
                }
                Err(_) => {
                    warn!("{} timed out connecting to {}", id, remote);
                    events.post(TransportEvent::Failed {
                        id,
                        code: ErrorCode::ConnectTimeout,
                    });
                }
            }
        });

        Ok(Box::new(StreamLink::new(batch_sender, cancel)))
    }

    fn shutdown(&mut self) {
        self.context.shutdown.cancel();
    }
}

async fn accept_loop(listener: TcpListener, config: TcpConfig, context: TransportContext) {
    loop {
        let accepted = tokio::select! {
            _ = context.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, remote)) => {
                let id = context.ids.generate();
                debug!("{} accepted from {}", id, remote);

                let (batch_sender, batch_receiver) = mpsc::unbounded_channel();
                let cancel = context.shutdown.child_token();
                let link = StreamLink::new(batch_sender, cancel.clone());
                // Accepted must reach the owner before any Received for this id
                context.events.post(TransportEvent::Accepted {
                    id,
                    remote,
                    link: Box::new(link),
                });

                let config = config.clone();
                let events = context.events.clone();
                context.handle.spawn(async move {
                    run_stream(stream, id, &config, events, batch_receiver, cancel).await;
                });
            }
            Err(error) => {
                warn!("TCP accept failed: {}", error);
                context.events.post(TransportEvent::AcceptFailed {
                    reason: error.to_string(),
                });
            }
        }
    }
    debug!("TCP accept loop stopped");
}

async fn run_stream(
    stream: TcpStream,
    id: ConnectionId,
    config: &TcpConfig,
    events: Poster<TransportEvent>,
    batches: UnboundedReceiver<Vec<Bytes>>,
    cancel: CancellationToken,
) {
    if let Err(error) = stream.set_nodelay(config.nodelay) {
        debug!("{} could not set nodelay: {}", id, error);
    }
    let (reader, writer) = stream.into_split();

    tokio::spawn(read_loop(
        reader,
        id,
        config.read_buffer_size,
        events.clone(),
        cancel.clone(),
    ));
    write_loop(writer, id, events, batches, cancel).await;
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    id: ConnectionId,
    read_buffer_size: usize,
    events: Poster<TransportEvent>,
    cancel: CancellationToken,
) {
    let mut buffer = BytesMut::with_capacity(read_buffer_size);
    loop {
        buffer.reserve(read_buffer_size);
        let read = tokio::select! {
            _ = cancel.cancelled() => return,
            read = reader.read_buf(&mut buffer) => read,
        };
        match read {
            Ok(0) => {
                debug!("{} closed by peer", id);
                events.post(TransportEvent::Failed {
                    id,
                    code: ErrorCode::PeerDisconnect,
                });
                break;
            }
            Ok(count) => {
                trace!("{} read {} bytes", id, count);
                events.post(TransportEvent::Received {
                    id,
                    bytes: buffer.split().freeze(),
                });
            }
            Err(error) => {
                debug!("{} read failed: {}", id, error);
                events.post(TransportEvent::Failed {
                    id,
                    code: ErrorCode::SocketCantReceive,
                });
                break;
            }
        }
    }
    cancel.cancel();
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    id: ConnectionId,
    events: Poster<TransportEvent>,
    mut batches: UnboundedReceiver<Vec<Bytes>>,
    cancel: CancellationToken,
) {
    loop {
        let batch = tokio::select! {
            _ = cancel.cancelled() => break,
            batch = batches.recv() => batch,
        };
        let Some(batch) = batch else {
            break;
        };
        for chunk in batch {
            if let Err(error) = writer.write_all(&chunk).await {
                debug!("{} write failed: {}", id, error);
                events.post(TransportEvent::Failed {
                    id,
                    code: ErrorCode::SocketCantSend,
                });
                cancel.cancel();
                return;
            }
        }
        events.post(TransportEvent::SendComplete { id });
    }
    let _ = writer.shutdown().await;
}

/// Owner-side handle of a TCP connection. One writer task drains the batch
/// queue; the Channel keeps at most one batch in flight.
struct StreamLink {
    batches: UnboundedSender<Vec<Bytes>>,
    cancel: CancellationToken,
}

impl StreamLink {
    fn new(batches: UnboundedSender<Vec<Bytes>>, cancel: CancellationToken) -> Self {
        Self { batches, cancel }
    }
}

impl Link for StreamLink {
    fn is_stream(&self) -> bool {
        true
    }

    fn send(&mut self, batch: Vec<Outgoing>) -> LinkSend {
        let chunks = batch.into_iter().map(|outgoing| outgoing.bytes).collect();
        match self.batches.send(chunks) {
            Ok(()) => LinkSend::Pending,
            Err(_) => LinkSend::Closed,
        }
    }

    fn close(&mut self) {
        self.cancel.cancel();
    }
}
