use std::{collections::HashMap, io, mem, net::SocketAddr, time::Instant};

use bytes::BytesMut;
use log::{debug, info, trace, warn};
use tokio::{
    net::UdpSocket,
    sync::mpsc::{UnboundedReceiver, UnboundedSender},
    time::MissedTickBehavior,
};

use courier_shared::{ConnectionId, ErrorCode, Reliability};

use super::{
    packet::Datagram,
    peer::{Peer, PeerState, ReliabilitySettings},
    pool::PacketPool,
    UdpConfig, UdpLink, MAIN_SUB_CHANNEL, MAX_RECEIVE_SIZE,
};
use crate::transport::{Outgoing, TransportContext, TransportEvent};

pub(crate) enum EngineCommand {
    Connect {
        id: ConnectionId,
        local_conn: u32,
        remote: SocketAddr,
    },
    Send {
        local_conn: u32,
        batch: Vec<Outgoing>,
    },
    Close {
        local_conn: u32,
    },
}

/// Owns the UDP socket and every peer multiplexed over it
pub(crate) struct Engine {
    socket: UdpSocket,
    config: UdpConfig,
    settings: ReliabilitySettings,
    context: TransportContext,
    listening: bool,
    peers: HashMap<u32, Peer>,
    // (remote address, remote conn id) -> local conn id, to dedup SYN resends
    accepted: HashMap<(SocketAddr, u32), u32>,
    commands: UnboundedReceiver<EngineCommand>,
    command_sender: UnboundedSender<EngineCommand>,
    pool: PacketPool,
    scratch: BytesMut,
}

impl Engine {
    pub fn new(
        socket: UdpSocket,
        config: UdpConfig,
        context: TransportContext,
        listening: bool,
        commands: UnboundedReceiver<EngineCommand>,
        command_sender: UnboundedSender<EngineCommand>,
    ) -> Self {
        let settings = ReliabilitySettings {
            resend_interval: config.resend_interval,
            max_resends: config.max_resends,
            window: config.send_window,
            max_message_size: config.max_message_size,
        };
        let pool = PacketPool::new(MAX_RECEIVE_SIZE, config.pooled_packets);
        Self {
            socket,
            settings,
            context,
            listening,
            peers: HashMap::new(),
            accepted: HashMap::new(),
            commands,
            command_sender,
            pool,
            scratch: BytesMut::with_capacity(config.max_datagram_size),
            config,
        }
    }

    pub async fn run(mut self) {
        let mut tick = tokio::time::interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let shutdown = self.context.shutdown.clone();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.apply(command, Instant::now()),
                    None => break,
                },
                readable = self.socket.readable() => match readable {
                    Ok(()) => self.receive_ready(Instant::now()),
                    Err(error) => {
                        warn!("UDP socket failed: {}", error);
                        break;
                    }
                },
                _ = tick.tick() => self.update(Instant::now()),
            }
        }

        self.close_all();
        debug!("UDP engine stopped");
    }

    fn max_fragment(&self) -> usize {
        self.config.max_fragment_size()
    }

    fn apply(&mut self, command: EngineCommand, now: Instant) {
        match command {
            EngineCommand::Connect {
                id,
                local_conn,
                remote,
            } => {
                if local_conn == 0 || self.peers.contains_key(&local_conn) {
                    self.context.events.post(TransportEvent::Failed {
                        id,
                        code: ErrorCode::ConnectFailed,
                    });
                    return;
                }
                debug!("{} sending SYN to {}", id, remote);
                self.peers
                    .insert(local_conn, Peer::connecting(id, local_conn, remote, now));
                send_to(
                    &self.socket,
                    &mut self.scratch,
                    remote,
                    &Datagram::Syn { sender: local_conn },
                );
            }
            EngineCommand::Send { local_conn, batch } => {
                let max_fragment = self.max_fragment();
                let Some(peer) = self.peers.get_mut(&local_conn) else {
                    return;
                };
                for outgoing in batch {
                    match outgoing.reliability {
                        Reliability::ReliableOrdered => {
                            peer.queue_reliable(MAIN_SUB_CHANNEL, outgoing.bytes, max_fragment)
                        }
                        Reliability::Unreliable => {
                            if outgoing.bytes.len() > max_fragment {
                                warn!(
                                    "{} dropping {} byte unreliable packet, larger than one datagram",
                                    peer.id,
                                    outgoing.bytes.len()
                                );
                                continue;
                            }
                            if !peer.can_send() {
                                continue;
                            }
                            let datagram = peer.unreliable(MAIN_SUB_CHANNEL, outgoing.bytes, now);
                            send_to(&self.socket, &mut self.scratch, peer.remote_addr, &datagram);
                        }
                    }
                }
                if peer.can_send() {
                    if let Err(code) = flush(
                        &self.socket,
                        &mut self.scratch,
                        peer,
                        &self.settings,
                        now,
                    ) {
                        self.fail_peer(local_conn, code);
                    }
                }
            }
            EngineCommand::Close { local_conn } => {
                if let Some(peer) = self.remove_peer(local_conn) {
                    debug!("{} closed locally", peer.id);
                    self.send_fin(&peer, ErrorCode::PeerDisconnect);
                }
            }
        }
    }

    fn receive_ready(&mut self, now: Instant) {
        loop {
            let mut packet = self.pool.acquire();
            let (length, from) = match self.socket.try_recv_from(packet.buffer_mut()) {
                Ok(received) => received,
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => return,
                Err(error) => {
                    debug!("UDP receive failed: {}", error);
                    return;
                }
            };
            packet.set_len(length);
            let decoded = Datagram::decode(&packet);
            // back to the pool before any handling
            drop(packet);

            match decoded {
                Ok(datagram) => self.handle_datagram(from, datagram, now),
                Err(error) => trace!("dropping datagram from {}: {}", from, error),
            }
        }
    }

    fn handle_datagram(&mut self, from: SocketAddr, datagram: Datagram, now: Instant) {
        match datagram {
            Datagram::Syn { sender } => self.on_syn(from, sender, now),
            Datagram::Ack { sender, receiver } => {
                let Some(peer) = self.peers.get_mut(&receiver) else {
                    return;
                };
                if peer.remote_addr != from {
                    return;
                }
                if let PeerState::Connecting { .. } = peer.state {
                    peer.remote_conn = sender;
                    peer.state = PeerState::Connected;
                    peer.last_received = now;
                    debug!("{} connected to {}", peer.id, from);
                    self.context
                        .events
                        .post(TransportEvent::Connected { id: peer.id });
                    // completes the accept on the remote side
                    let ping = peer.ping(now);
                    send_to(&self.socket, &mut self.scratch, from, &ping);
                    if let Err(code) =
                        flush(&self.socket, &mut self.scratch, peer, &self.settings, now)
                    {
                        self.fail_peer(receiver, code);
                    }
                }
            }
            Datagram::Fin {
                sender,
                receiver,
                code,
            } => {
                let matches = self.peers.get(&receiver).map_or(false, |peer| {
                    peer.remote_addr == from
                        && (peer.remote_conn == sender
                            || matches!(peer.state, PeerState::Connecting { .. }))
                });
                if !matches {
                    return;
                }
                let code = ErrorCode::from_code(code);
                let code = if code.is_transport_fatal() {
                    code
                } else {
                    ErrorCode::PeerDisconnect
                };
                if let Some(peer) = self.remove_peer(receiver) {
                    debug!("{} closed by peer: {}", peer.id, code);
                    self.context
                        .events
                        .post(TransportEvent::Failed { id: peer.id, code });
                }
            }
            Datagram::Msg {
                sender,
                receiver,
                sub_channel,
                delivery,
                sequence,
                payload,
            } => {
                let Some(peer) = self.peers.get_mut(&receiver) else {
                    trace!("MSG from {} for unknown conn {}", from, receiver);
                    let fin = Datagram::Fin {
                        sender: receiver,
                        receiver: sender,
                        code: ErrorCode::NotFoundChannel.code(),
                    };
                    send_to(&self.socket, &mut self.scratch, from, &fin);
                    return;
                };
                if peer.remote_conn != sender || peer.remote_addr != from {
                    return;
                }
                peer.mark_heard(now);
                let (ack, delivered) =
                    match peer.on_msg(sub_channel, delivery, sequence, payload, &self.settings) {
                        Ok(received) => received,
                        Err(code) => {
                            warn!("{} reassembled message from {} too large", peer.id, from);
                            self.fail_peer(receiver, code);
                            return;
                        }
                    };
                if let Some(ack) = ack {
                    send_to(&self.socket, &mut self.scratch, from, &ack);
                }
                for bytes in delivered {
                    self.context
                        .events
                        .post(TransportEvent::Received { id: peer.id, bytes });
                }
            }
            Datagram::MsgAck {
                sender,
                receiver,
                sub_channel,
                sequence,
            } => {
                if let Some(peer) = self.known_peer(from, sender, receiver) {
                    peer.mark_heard(now);
                    peer.on_ack(sub_channel, sequence);
                }
            }
            Datagram::Ping { sender, receiver } => {
                if let Some(peer) = self.known_peer(from, sender, receiver) {
                    peer.mark_heard(now);
                }
            }
            Datagram::Reconnect { sender, receiver } => {
                self.on_reconnect(from, sender, receiver, now)
            }
            Datagram::ReconnectAck { sender, receiver } => {
                if let Some(peer) = self.known_peer(from, sender, receiver) {
                    debug!("{} reconnect confirmed by {}", peer.id, from);
                    peer.mark_heard(now);
                }
            }
        }
    }

    // Follows a peer to a new address once it proves both conn ids
    fn on_reconnect(&mut self, from: SocketAddr, sender: u32, receiver: u32, now: Instant) {
        let Some(peer) = self.peers.get_mut(&receiver) else {
            trace!("RECONNECT from {} for unknown conn {}", from, receiver);
            return;
        };
        if peer.remote_conn != sender || matches!(peer.state, PeerState::Connecting { .. }) {
            warn!(
                "{} RECONNECT from {} with conn ids {}/{}, expected {}/{}",
                peer.id, from, sender, receiver, peer.remote_conn, peer.local_conn
            );
            return;
        }

        if peer.remote_addr != from {
            info!("{} remote moved from {} to {}", peer.id, peer.remote_addr, from);
            let previous = mem::replace(&mut peer.remote_addr, from);
            if let Some(local_conn) = self.accepted.remove(&(previous, sender)) {
                self.accepted.insert((from, sender), local_conn);
            }
        }
        peer.mark_heard(now);

        let ack = Datagram::ReconnectAck {
            sender: receiver,
            receiver: sender,
        };
        send_to(&self.socket, &mut self.scratch, from, &ack);
    }

    fn known_peer(&mut self, from: SocketAddr, sender: u32, receiver: u32) -> Option<&mut Peer> {
        self.peers
            .get_mut(&receiver)
            .filter(|peer| peer.remote_conn == sender && peer.remote_addr == from)
    }

    fn on_syn(&mut self, from: SocketAddr, sender: u32, now: Instant) {
        if !self.listening || sender == 0 {
            return;
        }

        // a resent SYN gets the same answer
        if let Some(local_conn) = self.accepted.get(&(from, sender)) {
            let ack = Datagram::Ack {
                sender: *local_conn,
                receiver: sender,
            };
            send_to(&self.socket, &mut self.scratch, from, &ack);
            return;
        }

        let local_conn = self.allocate_conn();
        let id = self.context.ids.generate();
        debug!("{} accepted from {}", id, from);
        self.peers
            .insert(local_conn, Peer::accepted(id, local_conn, sender, from, now));
        self.accepted.insert((from, sender), local_conn);

        self.context.events.post(TransportEvent::Accepted {
            id,
            remote: from,
            link: Box::new(UdpLink::new(local_conn, self.command_sender.clone())),
        });
        let ack = Datagram::Ack {
            sender: local_conn,
            receiver: sender,
        };
        send_to(&self.socket, &mut self.scratch, from, &ack);
    }

    fn update(&mut self, now: Instant) {
        let mut failures = Vec::new();

        for (local_conn, peer) in self.peers.iter_mut() {
            match peer.state {
                PeerState::Connecting { started, last_syn } => {
                    if now.duration_since(started) >= self.config.connect_timeout {
                        failures.push((*local_conn, ErrorCode::ConnectTimeout));
                    } else if now.duration_since(last_syn) >= self.config.syn_interval {
                        peer.state = PeerState::Connecting {
                            started,
                            last_syn: now,
                        };
                        let syn = Datagram::Syn { sender: *local_conn };
                        send_to(&self.socket, &mut self.scratch, peer.remote_addr, &syn);
                    }
                    continue;
                }
                PeerState::AwaitingFirst { accepted } => {
                    if now.duration_since(accepted) >= self.config.accept_timeout {
                        failures.push((*local_conn, ErrorCode::AcceptTimeout));
                        continue;
                    }
                }
                PeerState::Connected => {
                    if now.duration_since(peer.last_received) >= self.config.idle_timeout {
                        failures.push((*local_conn, ErrorCode::Timeout));
                        continue;
                    }
                }
            }

            if let Err(code) = flush(&self.socket, &mut self.scratch, peer, &self.settings, now) {
                failures.push((*local_conn, code));
                continue;
            }
            if peer.state == PeerState::Connected
                && peer.needs_ping(now, self.config.ping_interval)
            {
                let keepalive = if peer.needs_reconnect(now, self.config.reconnect_after) {
                    peer.reconnect(now)
                } else {
                    peer.ping(now)
                };
                send_to(&self.socket, &mut self.scratch, peer.remote_addr, &keepalive);
            }
        }

        for (local_conn, code) in failures {
            self.fail_peer(local_conn, code);
        }
    }

    fn fail_peer(&mut self, local_conn: u32, code: ErrorCode) {
        if let Some(peer) = self.remove_peer(local_conn) {
            debug!("{} failed: {}", peer.id, code);
            self.send_fin(&peer, code);
            self.context
                .events
                .post(TransportEvent::Failed { id: peer.id, code });
        }
    }

    fn send_fin(&mut self, peer: &Peer, code: ErrorCode) {
        if peer.remote_conn == 0 {
            return;
        }
        let fin = Datagram::Fin {
            sender: peer.local_conn,
            receiver: peer.remote_conn,
            code: code.code(),
        };
        send_to(&self.socket, &mut self.scratch, peer.remote_addr, &fin);
    }

    fn remove_peer(&mut self, local_conn: u32) -> Option<Peer> {
        let peer = self.peers.remove(&local_conn)?;
        self.accepted.remove(&(peer.remote_addr, peer.remote_conn));
        Some(peer)
    }

    fn allocate_conn(&self) -> u32 {
        loop {
            let candidate = fastrand::u32(1..);
            if !self.peers.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn close_all(&mut self) {
        let local_conns: Vec<u32> = self.peers.keys().copied().collect();
        for local_conn in local_conns {
            if let Some(peer) = self.remove_peer(local_conn) {
                self.send_fin(&peer, ErrorCode::PeerDisconnect);
            }
        }
    }
}

fn flush(
    socket: &UdpSocket,
    scratch: &mut BytesMut,
    peer: &mut Peer,
    settings: &ReliabilitySettings,
    now: Instant,
) -> Result<(), ErrorCode> {
    for datagram in peer.poll_reliable(now, settings)? {
        send_to(socket, scratch, peer.remote_addr, &datagram);
    }
    Ok(())
}

// Never awaits: a full socket buffer drops the datagram and the resend
// timer covers reliable traffic
fn send_to(socket: &UdpSocket, scratch: &mut BytesMut, to: SocketAddr, datagram: &Datagram) {
    scratch.clear();
    datagram.encode(scratch);
    match socket.try_send_to(scratch, to) {
        Ok(_) => {}
        Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
            trace!("UDP send buffer full, dropped datagram to {}", to);
        }
        Err(error) => debug!("UDP send to {} failed: {}", to, error),
    }
}
