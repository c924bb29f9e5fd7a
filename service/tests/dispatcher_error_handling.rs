/// Tests for Dispatcher registration error handling

use std::sync::Arc;

use courier_service::{
    shared::{Message, Opcode, Protocol, Request},
    Dispatcher, DispatcherError, HandlerError,
};
use courier_shared::CodecError;

struct Ping(u32);

impl Message for Ping {
    fn opcode() -> Opcode {
        10
    }

    fn name() -> &'static str {
        "Ping"
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0.to_le_bytes());
    }

    fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        let bytes: [u8; 4] = payload.try_into().map_err(|_| CodecError::Truncated {
            needed: 4,
            available: payload.len(),
        })?;
        Ok(Ping(u32::from_le_bytes(bytes)))
    }
}

impl Request for Ping {
    type Response = Ping;
}

struct Note;

impl Message for Note {
    fn opcode() -> Opcode {
        11
    }

    fn name() -> &'static str {
        "Note"
    }

    fn encode(&self, _out: &mut Vec<u8>) {}

    fn decode(_payload: &[u8]) -> Result<Self, CodecError> {
        Ok(Note)
    }
}

fn protocol_with_ping() -> Arc<Protocol> {
    let mut builder = Protocol::builder();
    builder.add_request::<Ping>().unwrap();
    Arc::new(builder.build().unwrap())
}

#[test]
fn handler_for_unregistered_message_is_rejected() {
    let mut dispatcher = Dispatcher::new(protocol_with_ping());
    let result = dispatcher.on_message::<Note, _>(|_, _| {}).map(|_| ());
    assert_eq!(
        result,
        Err(DispatcherError::NotInProtocol {
            opcode: 11,
            name: "Note"
        })
    );
    assert!(!dispatcher.has_handler(11));
}

#[test]
fn second_handler_for_an_opcode_is_rejected() {
    let mut dispatcher = Dispatcher::new(protocol_with_ping());
    dispatcher
        .on_request::<Ping, _>(|_, ping| Ok(Ping(ping.0 + 1)))
        .unwrap();

    let result = dispatcher
        .on_request_deferred::<Ping, _>(|_, _, responder| {
            responder.fail(HandlerError::failed("unused"))
        })
        .map(|_| ());
    assert_eq!(
        result,
        Err(DispatcherError::DuplicateHandler {
            opcode: 10,
            name: "Ping"
        })
    );
    assert!(dispatcher.has_handler(10));
}

#[test]
fn registration_errors_name_the_message() {
    let error = DispatcherError::DuplicateHandler {
        opcode: 10,
        name: "Ping",
    };
    let text = error.to_string();
    assert!(text.contains("Ping"));
    assert!(text.contains("10"));
}
