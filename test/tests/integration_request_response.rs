/// Integration tests for request/response over every transport
/// A call issued by a client resolves with the server handler's answer

use courier_service::{
    shared::{ConnectionId, ErrorCode},
    Dispatcher, HandlerError, Node, RpcError, SessionOpenedEvent,
};
use courier_test::{client_node, protocol, pump_until, server_node, Bump, Echo, TransportKind};

fn echo_dispatcher() -> Dispatcher {
    let mut dispatcher = Dispatcher::new(protocol());
    dispatcher
        .on_request::<Echo, _>(|_, echo| match echo.0.as_str() {
            "reject" => Err(HandlerError::rejected(ErrorCode::Custom(7), "rejected")),
            "fail" => Err(HandlerError::failed("no good")),
            "panic" => panic!("echo handler blew up"),
            _ => Ok(echo),
        })
        .unwrap();
    dispatcher
}

fn connected_pair(transport: TransportKind) -> (Node, Node, ConnectionId) {
    let mut server = server_node(transport, echo_dispatcher());
    let mut client = client_node(transport);
    let addr = server.local_addr().unwrap();
    let id = client.connect(transport.endpoint(addr)).unwrap();
    (server, client, id)
}

fn call_echo(
    server: &mut Node,
    client: &mut Node,
    id: ConnectionId,
    text: &str,
) -> Result<Echo, RpcError> {
    let mut response = client.call(id, &Echo(text.to_string())).unwrap();
    let mut outcome = None;
    let resolved = pump_until(&mut [&mut *server, &mut *client], |_| {
        outcome = response.try_take();
        outcome.is_some()
    });
    assert!(resolved, "call {:?} never resolved", text);
    outcome.unwrap()
}

#[test]
fn echo_round_trip_on_every_transport() {
    let _ = env_logger::builder().is_test(true).try_init();

    for transport in TransportKind::ALL {
        let (mut server, mut client, id) = connected_pair(transport);

        let reply = call_echo(&mut server, &mut client, id, "hello");
        assert_eq!(reply, Ok(Echo("hello".to_string())), "{:?}", transport);
        assert_eq!(client.pending_count(id), 0, "{:?}", transport);
    }
}

#[test]
fn call_issued_before_connect_is_flushed_once_connected() {
    for transport in TransportKind::ALL {
        let (mut server, mut client, id) = connected_pair(transport);
        assert!(!client.service().channel(id).unwrap().is_connected());

        let mut first = client.call(id, &Echo("one".to_string())).unwrap();
        let mut second = client.call(id, &Echo("two".to_string())).unwrap();
        assert_eq!(client.service().channel(id).unwrap().pending_len(), 2);

        let mut results = (None, None);
        let resolved = pump_until(&mut [&mut server, &mut client], |_| {
            if results.0.is_none() {
                results.0 = first.try_take();
            }
            if results.1.is_none() {
                results.1 = second.try_take();
            }
            results.0.is_some() && results.1.is_some()
        });
        assert!(resolved, "{:?}", transport);
        assert_eq!(results.0, Some(Ok(Echo("one".to_string()))));
        assert_eq!(results.1, Some(Ok(Echo("two".to_string()))));
    }
}

#[test]
fn accepted_connection_opens_a_session_with_remote_address() {
    let transport = TransportKind::Tcp;
    let (mut server, mut client, _id) = connected_pair(transport);

    let mut opened = Vec::new();
    let found = pump_until(&mut [&mut client], |_| {
        let mut events = server.pump().unwrap();
        opened.extend(events.read::<SessionOpenedEvent>());
        !opened.is_empty()
    });
    assert!(found);
    let (server_id, remote) = opened[0];
    assert!(remote.is_some());
    assert!(server.session(server_id).is_some());
}

#[test]
fn handler_errors_come_back_as_remote_errors() {
    for transport in [TransportKind::Udp, TransportKind::Tcp] {
        let (mut server, mut client, id) = connected_pair(transport);

        let rejected = call_echo(&mut server, &mut client, id, "reject");
        assert!(matches!(
            rejected,
            Err(RpcError::Remote { code: ErrorCode::Custom(7), .. })
        ));

        let failed = call_echo(&mut server, &mut client, id, "fail");
        assert!(matches!(
            failed,
            Err(RpcError::Remote { code: ErrorCode::HandlerFailed, .. })
        ));

        // the connection survives handler failures
        let reply = call_echo(&mut server, &mut client, id, "still here");
        assert_eq!(reply, Ok(Echo("still here".to_string())));
    }
}

#[test]
fn handler_panic_becomes_error_response() {
    let (mut server, mut client, id) = connected_pair(TransportKind::Tcp);

    let panicked = call_echo(&mut server, &mut client, id, "panic");
    match panicked {
        Err(RpcError::Remote { code, message }) => {
            assert_eq!(code, ErrorCode::HandlerPanicked);
            assert!(message.contains("blew up"));
        }
        other => panic!("expected a panic error response, got {:?}", other),
    }

    let reply = call_echo(&mut server, &mut client, id, "after");
    assert_eq!(reply, Ok(Echo("after".to_string())));
}

#[test]
fn request_without_handler_is_unknown_opcode() {
    let (mut server, mut client, id) = connected_pair(TransportKind::Tcp);

    let mut response = client.call(id, &Bump(1)).unwrap();
    let mut outcome = None;
    assert!(pump_until(&mut [&mut server, &mut client], |_| {
        outcome = response.try_take();
        outcome.is_some()
    }));
    assert!(matches!(
        outcome,
        Some(Err(RpcError::Remote { code: ErrorCode::UnknownOpcode, .. }))
    ));
}
