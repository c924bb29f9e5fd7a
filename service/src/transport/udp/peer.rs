use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    time::{Duration, Instant},
};

use bytes::{Bytes, BytesMut};

use courier_shared::{
    sequence_distance, sequence_greater_than, sequence_less_than, ConnectionId, ErrorCode,
    SequenceNumber, SubChannel,
};

use super::packet::{Datagram, Delivery};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PeerState {
    /// SYN sent, waiting for ACK
    Connecting { started: Instant, last_syn: Instant },
    /// ACK sent, waiting for the peer's first datagram after it
    AwaitingFirst { accepted: Instant },
    Connected,
}

struct InFlight {
    sequence: SequenceNumber,
    payload: Bytes,
    more_fragments: bool,
    last_sent: Instant,
    resends: u32,
}

#[derive(Default)]
struct SubChannelState {
    // send side
    next_reliable: SequenceNumber,
    next_unreliable: SequenceNumber,
    in_flight: VecDeque<InFlight>,
    backlog: VecDeque<(Bytes, bool)>,
    // receive side
    next_expected: SequenceNumber,
    out_of_order: HashMap<SequenceNumber, (Bytes, bool)>,
    partial: BytesMut,
    last_unreliable: Option<SequenceNumber>,
}

/// Settings the reliability layer needs on every poll
#[derive(Clone, Copy, Debug)]
pub(crate) struct ReliabilitySettings {
    pub resend_interval: Duration,
    pub max_resends: u32,
    pub window: usize,
    /// Largest message a peer may reassemble from fragments
    pub max_message_size: usize,
}

/// Reliability state of one UDP connection, independent of any socket
pub(crate) struct Peer {
    pub id: ConnectionId,
    pub local_conn: u32,
    pub remote_conn: u32,
    pub remote_addr: SocketAddr,
    pub state: PeerState,
    /// Set on the side that sent the SYN; only that side asks to reconnect
    pub initiated: bool,
    pub last_received: Instant,
    pub last_sent: Instant,
    sub_channels: HashMap<SubChannel, SubChannelState>,
}

impl Peer {
    pub fn connecting(id: ConnectionId, local_conn: u32, remote_addr: SocketAddr, now: Instant) -> Self {
        Self::new(
            id,
            local_conn,
            0,
            remote_addr,
            PeerState::Connecting {
                started: now,
                last_syn: now,
            },
            now,
        )
    }

    pub fn accepted(
        id: ConnectionId,
        local_conn: u32,
        remote_conn: u32,
        remote_addr: SocketAddr,
        now: Instant,
    ) -> Self {
        Self::new(
            id,
            local_conn,
            remote_conn,
            remote_addr,
            PeerState::AwaitingFirst { accepted: now },
            now,
        )
    }

    fn new(
        id: ConnectionId,
        local_conn: u32,
        remote_conn: u32,
        remote_addr: SocketAddr,
        state: PeerState,
        now: Instant,
    ) -> Self {
        Self {
            id,
            local_conn,
            remote_conn,
            remote_addr,
            initiated: matches!(state, PeerState::Connecting { .. }),
            state,
            last_received: now,
            last_sent: now,
            sub_channels: HashMap::new(),
        }
    }

    /// Whether the remote side knows both conn ids
    pub fn can_send(&self) -> bool {
        !matches!(self.state, PeerState::Connecting { .. })
    }

    /// Records traffic from the remote; the first datagram after an ACK
    /// completes an accepted connection
    pub fn mark_heard(&mut self, now: Instant) {
        self.last_received = now;
        if let PeerState::AwaitingFirst { .. } = self.state {
            self.state = PeerState::Connected;
        }
    }

    pub fn needs_ping(&self, now: Instant, interval: Duration) -> bool {
        now.duration_since(self.last_sent) >= interval
    }

    pub fn ping(&mut self, now: Instant) -> Datagram {
        self.last_sent = now;
        Datagram::Ping {
            sender: self.local_conn,
            receiver: self.remote_conn,
        }
    }

    /// Whether the remote went quiet long enough that it may no longer
    /// recognize our address
    pub fn needs_reconnect(&self, now: Instant, silence: Duration) -> bool {
        self.initiated
            && self.state == PeerState::Connected
            && now.duration_since(self.last_received) >= silence
    }

    pub fn reconnect(&mut self, now: Instant) -> Datagram {
        self.last_sent = now;
        Datagram::Reconnect {
            sender: self.local_conn,
            receiver: self.remote_conn,
        }
    }

    /// Splits `payload` into fragments of at most `max_fragment` bytes and
    /// queues them for reliable, ordered delivery
    pub fn queue_reliable(&mut self, sub_channel: SubChannel, payload: Bytes, max_fragment: usize) {
        let state = self.sub_channels.entry(sub_channel).or_default();
        if payload.is_empty() {
            state.backlog.push_back((payload, false));
            return;
        }
        let mut remaining = payload;
        while !remaining.is_empty() {
            let take = remaining.len().min(max_fragment.max(1));
            let fragment = remaining.split_to(take);
            state.backlog.push_back((fragment, !remaining.is_empty()));
        }
    }

    /// Builds the datagram for a fire-and-forget message
    pub fn unreliable(&mut self, sub_channel: SubChannel, payload: Bytes, now: Instant) -> Datagram {
        let state = self.sub_channels.entry(sub_channel).or_default();
        let sequence = state.next_unreliable;
        state.next_unreliable = sequence.wrapping_add(1);
        self.last_sent = now;
        Datagram::Msg {
            sender: self.local_conn,
            receiver: self.remote_conn,
            sub_channel,
            delivery: Delivery::Unreliable,
            sequence,
            payload,
        }
    }

    /// Moves queued fragments into the send window and returns every
    /// datagram due for (re)transmission. Fails with `Timeout` once a
    /// fragment has been resent `max_resends` times without an ack.
    pub fn poll_reliable(
        &mut self,
        now: Instant,
        settings: &ReliabilitySettings,
    ) -> Result<Vec<Datagram>, ErrorCode> {
        let (sender, receiver) = (self.local_conn, self.remote_conn);
        let mut due = Vec::new();

        for (sub_channel, state) in self.sub_channels.iter_mut() {
            for in_flight in state.in_flight.iter_mut() {
                if now.duration_since(in_flight.last_sent) < settings.resend_interval {
                    continue;
                }
                if in_flight.resends >= settings.max_resends {
                    return Err(ErrorCode::Timeout);
                }
                in_flight.resends += 1;
                in_flight.last_sent = now;
                due.push(Datagram::Msg {
                    sender,
                    receiver,
                    sub_channel: *sub_channel,
                    delivery: Delivery::Reliable {
                        more_fragments: in_flight.more_fragments,
                    },
                    sequence: in_flight.sequence,
                    payload: in_flight.payload.clone(),
                });
            }

            while state.in_flight.len() < settings.window {
                let Some((payload, more_fragments)) = state.backlog.pop_front() else {
                    break;
                };
                let sequence = state.next_reliable;
                state.next_reliable = sequence.wrapping_add(1);
                due.push(Datagram::Msg {
                    sender,
                    receiver,
                    sub_channel: *sub_channel,
                    delivery: Delivery::Reliable { more_fragments },
                    sequence,
                    payload: payload.clone(),
                });
                state.in_flight.push_back(InFlight {
                    sequence,
                    payload,
                    more_fragments,
                    last_sent: now,
                    resends: 0,
                });
            }
        }

        if !due.is_empty() {
            self.last_sent = now;
        }
        Ok(due)
    }

    pub fn on_ack(&mut self, sub_channel: SubChannel, sequence: SequenceNumber) {
        if let Some(state) = self.sub_channels.get_mut(&sub_channel) {
            state.in_flight.retain(|in_flight| in_flight.sequence != sequence);
        }
    }

    /// Applies a received MSG. Returns the ack to send back, if any, and
    /// every message the datagram completed, in order. Fails with
    /// `MessageTooLarge` once a message outgrows `max_message_size`.
    pub fn on_msg(
        &mut self,
        sub_channel: SubChannel,
        delivery: Delivery,
        sequence: SequenceNumber,
        payload: Bytes,
        settings: &ReliabilitySettings,
    ) -> Result<(Option<Datagram>, Vec<Bytes>), ErrorCode> {
        let (sender, receiver) = (self.local_conn, self.remote_conn);
        let state = self.sub_channels.entry(sub_channel).or_default();

        let more_fragments = match delivery {
            Delivery::Unreliable => {
                if let Some(last) = state.last_unreliable {
                    if !sequence_greater_than(sequence, last) {
                        return Ok((None, Vec::new()));
                    }
                }
                state.last_unreliable = Some(sequence);
                return Ok((None, vec![payload]));
            }
            Delivery::Reliable { more_fragments } => more_fragments,
        };

        let ack = Datagram::MsgAck {
            sender,
            receiver,
            sub_channel,
            sequence,
        };

        // already delivered; the ack was lost
        if sequence_less_than(sequence, state.next_expected) {
            return Ok((Some(ack), Vec::new()));
        }
        let ahead = sequence_distance(state.next_expected, sequence);
        if ahead < 0 || ahead as usize >= settings.window {
            return Ok((None, Vec::new()));
        }

        state
            .out_of_order
            .entry(sequence)
            .or_insert((payload, more_fragments));

        let mut delivered = Vec::new();
        while let Some((fragment, more)) = state.out_of_order.remove(&state.next_expected) {
            state.next_expected = state.next_expected.wrapping_add(1);
            if state.partial.len() + fragment.len() > settings.max_message_size {
                return Err(ErrorCode::MessageTooLarge);
            }
            state.partial.extend_from_slice(&fragment);
            if !more {
                delivered.push(state.partial.split().freeze());
            }
        }
        Ok((Some(ack), delivered))
    }

    /// Reliable fragments sent but not yet acknowledged
    pub fn in_flight(&self) -> usize {
        self.sub_channels
            .values()
            .map(|state| state.in_flight.len())
            .sum()
    }

    /// Reliable fragments waiting for room in the send window
    pub fn backlog(&self) -> usize {
        self.sub_channels
            .values()
            .map(|state| state.backlog.len())
            .sum()
    }
}
