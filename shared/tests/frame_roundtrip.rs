/// PROPERTY-BASED TESTS: framing invariants
///
/// decode(encode(frame)) == frame for every representable frame, including
/// empty payloads, at both header widths.

use courier_shared::{flags, ActorId, Address, Bytes, Frame, HeaderWidth};
use proptest::prelude::*;

fn actor_strategy() -> impl Strategy<Value = ActorId> {
    (any::<i32>(), any::<i32>(), any::<i64>())
        .prop_map(|(process, sub_process, instance)| {
            ActorId::new(Address::new(process, sub_process), instance)
        })
}

fn flags_strategy() -> impl Strategy<Value = u8> {
    prop_oneof![
        Just(0u8),
        Just(flags::RESPONSE),
        Just(flags::RESPONSE | flags::ERROR),
    ]
}

fn payload_strategy() -> impl Strategy<Value = Bytes> {
    prop::collection::vec(any::<u8>(), 0..512).prop_map(Bytes::from)
}

proptest! {
    #[test]
    fn prop_inter_process_roundtrip(
        opcode in any::<u16>(),
        correlation_id in any::<i32>(),
        actor in actor_strategy(),
        flags in flags_strategy(),
        payload in payload_strategy(),
    ) {
        let frame = Frame::new(opcode, correlation_id, actor, flags, payload);
        let packet = frame.encode(HeaderWidth::InterProcess).unwrap();
        prop_assert_eq!(packet.len(), HeaderWidth::INTER_PROCESS_LEN + frame.payload().len());
        let decoded = Frame::decode(packet, HeaderWidth::InterProcess).unwrap();
        prop_assert_eq!(decoded, frame);
    }

    #[test]
    fn prop_client_roundtrip(
        opcode in any::<u16>(),
        correlation_id in any::<i32>(),
        flags in flags_strategy(),
        payload in payload_strategy(),
    ) {
        let frame = Frame::new(opcode, correlation_id, ActorId::NONE, flags, payload);
        let packet = frame.encode(HeaderWidth::Client).unwrap();
        let decoded = Frame::decode(packet, HeaderWidth::Client).unwrap();
        prop_assert_eq!(decoded, frame);
    }

    #[test]
    fn prop_decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
        let _ = Frame::decode(Bytes::from(bytes.clone()), HeaderWidth::Client);
        let _ = Frame::decode(Bytes::from(bytes), HeaderWidth::InterProcess);
    }
}
