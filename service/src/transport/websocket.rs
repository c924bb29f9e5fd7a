use std::{net::SocketAddr, time::Duration};

use bytes::Bytes;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use log::{debug, info, trace, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
};
use tokio_tungstenite::{
    accept_async_with_config, connect_async_with_config,
    tungstenite::{
        error::Error as WsError,
        protocol::{
            frame::coding::CloseCode, CloseFrame, Message as WsMessage,
            WebSocketConfig as WsProtocolConfig,
        },
    },
    WebSocketStream,
};
use tokio_util::sync::CancellationToken;

use courier_shared::{ConnectionId, ErrorCode, Poster};

use super::{
    bind_tcp_listener, Endpoint, Link, LinkSend, Outgoing, Transport, TransportContext,
    TransportEvent,
};
use crate::error::ServiceError;

const TRANSPORT_NAME: &str = "websocket";

// WebSocket Configuration
#[derive(Clone, Debug)]
pub struct WebSocketConfig {
    /// Largest incoming message; anything bigger closes the channel with 1009
    pub max_message_size: usize,
    /// Time allowed for the HTTP upgrade on either side
    pub handshake_timeout: Duration,
    /// Path used when an outbound Endpoint is a bare socket address
    pub path: String,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: 64 * 1024,
            handshake_timeout: Duration::from_secs(10),
            path: "/".to_string(),
        }
    }
}

impl WebSocketConfig {
    fn protocol_config(&self) -> WsProtocolConfig {
        let mut config = WsProtocolConfig::default();
        config.max_message_size = Some(self.max_message_size);
        config.max_frame_size = Some(self.max_message_size);
        config
    }
}

enum WsCommand {
    Batch(Vec<Bytes>),
    Close(CloseCode),
}

pub(crate) struct WebSocketTransport {
    config: WebSocketConfig,
    context: TransportContext,
    local_addr: Option<SocketAddr>,
}

impl WebSocketTransport {
    pub fn open(
        config: WebSocketConfig,
        listen: Option<SocketAddr>,
        context: TransportContext,
    ) -> Result<Self, ServiceError> {
        let mut local_addr = None;
        if let Some(addr) = listen {
            let listener = bind_tcp_listener(TRANSPORT_NAME, addr, &context.handle)?;
            local_addr = listener.local_addr().ok();
            info!("WebSocket listener bound on {:?}", local_addr);
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

    fn url_for(&self, endpoint: &Endpoint) -> String {
        match endpoint {
            Endpoint::Socket(addr) => format!("ws://{}{}", addr, self.config.path),
            Endpoint::Url(url) => url.clone(),
        }
    }
}

impl Transport for WebSocketTransport {
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
        let url = self.url_for(endpoint);
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err(ServiceError::UnsupportedEndpoint {
                endpoint: url,
                transport: TRANSPORT_NAME,
            });
        }

        let (command_sender, command_receiver) = mpsc::unbounded_channel();
        let cancel = self.context.shutdown.child_token();
        let config = self.config.clone();
        let events = self.context.events.clone();
        let task_cancel = cancel.clone();
        let commands = command_sender.clone();

        self.context.handle.spawn(async move {
            let connect = tokio::time::timeout(
                config.handshake_timeout,
                connect_async_with_config(url.as_str(), Some(config.protocol_config()), true),
            );
            let result = tokio::select! {
                _ = task_cancel.cancelled() => return,
                result = connect => result,
            };
            match result {
                Ok(Ok((stream, _response))) => {
                    debug!("{} connected to {}", id, url);
                    events.post(TransportEvent::Connected { id });
                    run_socket(stream, id, events, commands, command_receiver, task_cancel).await;
                }
                Ok(Err(error)) => {
                    warn!("{} failed to connect to {}: {}", id, url, error);
                    events.post(TransportEvent::Failed {
                        id,
                        code: ErrorCode::ConnectFailed,
                    });
                }
                Err(_) => {
                    warn!("{} timed out connecting to {}", id, url);
                    events.post(TransportEvent::Failed {
                        id,
                        code: ErrorCode::ConnectTimeout,
                    });
                }
            }
        });

        Ok(Box::new(WebSocketLink::new(command_sender, cancel)))
    }

    fn shutdown(&mut self) {
        self.context.shutdown.cancel();
    }
}

async fn accept_loop(listener: TcpListener, config: WebSocketConfig, context: TransportContext) {
    loop {
        let accepted = tokio::select! {
            _ = context.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, remote) = match accepted {
            Ok(accepted) => accepted,
            Err(error) => {
                warn!("WebSocket accept failed: {}", error);
                context.events.post(TransportEvent::AcceptFailed {
                    reason: error.to_string(),
                });
                continue;
            }
        };

        // the upgrade runs on its own task so the listener re-arms immediately
        let config = config.clone();
        let context = context.clone();
        tokio::spawn(async move {
            let handshake = tokio::time::timeout(
                config.handshake_timeout,
                accept_async_with_config(stream, Some(config.protocol_config())),
            );
            let stream = match handshake.await {
                Ok(Ok(stream)) => stream,
                Ok(Err(error)) => {
                    warn!("WebSocket upgrade from {} failed: {}", remote, error);
                    context.events.post(TransportEvent::AcceptFailed {
                        reason: error.to_string(),
                    });
                    return;
                }
                Err(_) => {
                    warn!("WebSocket upgrade from {} timed out", remote);
                    context.events.post(TransportEvent::AcceptFailed {
                        reason: format!("upgrade from {} timed out", remote),
                    });
                    return;
                }
            };

            let id = context.ids.generate();
            debug!("{} accepted from {}", id, remote);
            let (command_sender, command_receiver) = mpsc::unbounded_channel();
            let cancel = context.shutdown.child_token();
            context.events.post(TransportEvent::Accepted {
                id,
                remote,
                link: Box::new(WebSocketLink::new(command_sender.clone(), cancel.clone())),
            });
            run_socket(
                stream,
                id,
                context.events.clone(),
                command_sender,
                command_receiver,
                cancel,
            )
            .await;
        });
    }
    debug!("WebSocket accept loop stopped");
}

async fn run_socket<S>(
    stream: WebSocketStream<S>,
    id: ConnectionId,
    events: Poster<TransportEvent>,
    commands: UnboundedSender<WsCommand>,
    command_receiver: UnboundedReceiver<WsCommand>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, source) = stream.split();
    tokio::spawn(read_loop(source, id, events.clone(), commands, cancel.clone()));
    write_loop(sink, id, events, command_receiver, cancel).await;
}

async fn read_loop<S>(
    mut source: SplitStream<WebSocketStream<S>>,
    id: ConnectionId,
    events: Poster<TransportEvent>,
    commands: UnboundedSender<WsCommand>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = source.next() => next,
        };
        match next {
            Some(Ok(WsMessage::Binary(data))) => {
                trace!("{} received {} byte message", id, data.len());
                events.post(TransportEvent::Received {
                    id,
                    bytes: Bytes::from(data),
                });
            }
            Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {
                // tungstenite answers pings itself
                continue;
            }
            Some(Ok(WsMessage::Text(_))) => {
                debug!("{} sent a text message, only binary is allowed", id);
                events.post(TransportEvent::Failed {
                    id,
                    code: ErrorCode::MalformedFrame,
                });
                let _ = commands.send(WsCommand::Close(CloseCode::Unsupported));
                return;
            }
            Some(Ok(WsMessage::Frame(_))) => continue,
            Some(Ok(WsMessage::Close(_))) | None => {
                debug!("{} closed by peer", id);
                events.post(TransportEvent::Failed {
                    id,
                    code: ErrorCode::PeerDisconnect,
                });
                break;
            }
            Some(Err(WsError::Capacity(error))) => {
                warn!("{} received an oversized message: {}", id, error);
                events.post(TransportEvent::Failed {
                    id,
                    code: ErrorCode::MessageTooLarge,
                });
                // the writer sends the close frame and then stops
                let _ = commands.send(WsCommand::Close(CloseCode::Size));
                return;
            }
            Some(Err(error)) => {
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

async fn write_loop<S>(
    mut sink: SplitSink<WebSocketStream<S>, WsMessage>,
    id: ConnectionId,
    events: Poster<TransportEvent>,
    mut commands: UnboundedReceiver<WsCommand>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let command = tokio::select! {
            _ = cancel.cancelled() => break,
            command = commands.recv() => command,
        };
        match command {
            Some(WsCommand::Batch(batch)) => {
                for message in batch {
                    let message = WsMessage::Binary(message.into());
                    if let Err(error) = sink.feed(message).await {
                        debug!("{} write failed: {}", id, error);
                        events.post(TransportEvent::Failed {
                            id,
                            code: ErrorCode::SocketCantSend,
                        });
                        cancel.cancel();
                        return;
                    }
                }
                if let Err(error) = sink.flush().await {
                    debug!("{} flush failed: {}", id, error);
                    events.post(TransportEvent::Failed {
                        id,
                        code: ErrorCode::SocketCantSend,
                    });
                    cancel.cancel();
                    return;
                }
                events.post(TransportEvent::SendComplete { id });
            }
            Some(WsCommand::Close(code)) => {
                let frame = CloseFrame {
                    code,
                    reason: "".into(),
                };
                let _ = sink.send(WsMessage::Close(Some(frame))).await;
                cancel.cancel();
                return;
            }
            None => break,
        }
    }
    let _ = sink.close().await;
}

/// Owner-side handle of a WebSocket connection. One writer task sends
/// batches in order; the Channel keeps at most one batch in flight.
struct WebSocketLink {
    commands: UnboundedSender<WsCommand>,
    cancel: CancellationToken,
}

impl WebSocketLink {
    fn new(commands: UnboundedSender<WsCommand>, cancel: CancellationToken) -> Self {
        Self { commands, cancel }
    }
}

impl Link for WebSocketLink {
    fn is_stream(&self) -> bool {
        false
    }

    fn send(&mut self, batch: Vec<Outgoing>) -> LinkSend {
        let messages = batch.into_iter().map(|outgoing| outgoing.bytes).collect();
        match self.commands.send(WsCommand::Batch(messages)) {
            Ok(()) => LinkSend::Pending,
            Err(_) => LinkSend::Closed,
        }
    }

    fn close(&mut self) {
        if self.commands.send(WsCommand::Close(CloseCode::Normal)).is_err() {
            self.cancel.cancel();
        }
    }
}
