/// PROPERTY-BASED TESTS: stream framing and call correlation
///
/// Key invariants:
/// 1. Length-prefixed frames survive any split of the byte stream
/// 2. Pending calls never share a correlation id
/// 3. A response resolves exactly the call it answers

use std::collections::HashSet;

use bytes::BytesMut;
use proptest::prelude::*;

use courier_service::{FrameSink, Incoming, ServiceError, Session};
use courier_shared::{
    ActorId, Address, Bytes, ConnectionId, Frame, HeaderWidth, Message, PacketReassembler,
};
use courier_test::Echo;

fn frame_strategy() -> impl Strategy<Value = Frame> {
    (
        1u16..500,
        1i32..i32::MAX,
        0i64..1000,
        prop::collection::vec(any::<u8>(), 0..300),
    )
        .prop_map(|(opcode, correlation_id, instance_id, payload)| {
            Frame::request(opcode, correlation_id, Bytes::from(payload))
                .with_actor(ActorId::new(Address::new(2, 0), instance_id))
        })
}

/// Records frames instead of sending them
#[derive(Default)]
struct Recorded(Vec<Frame>);

impl FrameSink for Recorded {
    fn send_frame(&mut self, _id: ConnectionId, frame: &Frame) -> Result<(), ServiceError> {
        self.0.push(frame.clone());
        Ok(())
    }
}

proptest! {
    #[test]
    fn prop_frames_survive_any_stream_split(
        frames in prop::collection::vec(frame_strategy(), 1..8),
        cuts in prop::collection::vec(1usize..64, 0..40),
    ) {
        let mut stream = BytesMut::new();
        for frame in &frames {
            let packet = frame.encode(HeaderWidth::InterProcess).unwrap();
            PacketReassembler::write_packet(&packet, &mut stream);
        }
        let stream = stream.freeze();

        let mut reassembler = PacketReassembler::new(64 * 1024);
        let mut decoded = Vec::new();
        let mut offset = 0;
        let mut cuts = cuts.into_iter();
        while offset < stream.len() {
            let step = cuts.next().unwrap_or(stream.len());
            let end = (offset + step).min(stream.len());
            reassembler.push(&stream[offset..end]);
            offset = end;
            while let Some(packet) = reassembler.next_packet().unwrap() {
                decoded.push(Frame::decode(packet, HeaderWidth::InterProcess).unwrap());
            }
        }

        prop_assert_eq!(decoded, frames);
        prop_assert_eq!(reassembler.buffered(), 0);
    }

    #[test]
    fn prop_responses_resolve_only_their_call(
        calls in 1usize..40,
        answered in prop::collection::vec(any::<prop::sample::Index>(), 0..40),
    ) {
        let mut sink = Recorded::default();
        let mut session = Session::new(ConnectionId::new(1), 1);
        let mut futures = Vec::new();
        for i in 0..calls {
            futures.push(session.call(&mut sink, &Echo(i.to_string())).unwrap());
        }

        let ids: HashSet<i32> = sink.0.iter().map(|frame| frame.correlation_id()).collect();
        prop_assert_eq!(ids.len(), calls);

        let mut resolved = HashSet::new();
        for index in answered {
            let request = &sink.0[index.index(calls)];
            let response = Frame::response(
                request.opcode(),
                request.correlation_id(),
                ActorId::NONE,
                Echo::decode(request.payload()).unwrap().to_payload(),
            );
            let outcome = session.receive(response);
            if resolved.insert(request.correlation_id()) {
                prop_assert!(matches!(outcome, Incoming::Resolved));
            } else {
                prop_assert!(matches!(outcome, Incoming::Dropped));
            }
        }

        prop_assert_eq!(session.pending_count(), calls - resolved.len());
        for (i, future) in futures.iter_mut().enumerate() {
            let correlation_id = future.correlation_id();
            match future.try_take() {
                Some(result) => {
                    prop_assert!(resolved.contains(&correlation_id));
                    prop_assert_eq!(result, Ok(Echo(i.to_string())));
                }
                None => prop_assert!(session.is_pending(correlation_id)),
            }
        }
    }
}
