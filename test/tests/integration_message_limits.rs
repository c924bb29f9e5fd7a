/// Integration tests for message size limits
/// Oversized messages close the connection without reaching a handler;
/// large messages within limits arrive whole

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use courier_service::{
    shared::{Address, ErrorCode, ServiceKind},
    transport::WebSocketConfig,
    Dispatcher, SessionClosedEvent, TransportConfig,
};
use courier_test::{
    client_node, node_with, protocol, pump_until, server_node, Echo, Note, TransportKind,
};

#[test]
fn oversized_websocket_message_closes_the_channel() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dispatched = Arc::new(AtomicUsize::new(0));
    let mut dispatcher = Dispatcher::new(protocol());
    let counter = dispatched.clone();
    dispatcher
        .on_message::<Note, _>(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    let transport = TransportConfig::WebSocket(WebSocketConfig {
        max_message_size: 1024,
        ..Default::default()
    });
    let mut server = node_with(
        transport,
        ServiceKind::Outer,
        true,
        Address::new(1, 0),
        dispatcher,
    );
    let mut client = client_node(TransportKind::WebSocket);
    let id = client
        .connect(TransportKind::WebSocket.endpoint(server.local_addr().unwrap()))
        .unwrap();

    // a small message first, so the server session exists
    client.send(id, &Note(vec![1; 16])).unwrap();
    assert!(pump_until(&mut [&mut server, &mut client], |_| {
        dispatched.load(Ordering::SeqCst) == 1
    }));

    client.send(id, &Note(vec![2; 4096])).unwrap();
    let mut closed = Vec::new();
    assert!(pump_until(&mut [&mut client], |_| {
        let mut events = server.pump().unwrap();
        closed.extend(events.read::<SessionClosedEvent>());
        !closed.is_empty()
    }));
    assert_eq!(closed[0].1, ErrorCode::MessageTooLarge);
    assert_eq!(dispatched.load(Ordering::SeqCst), 1);
    assert_eq!(server.session_count(), 0);

    // the client learns the connection is gone
    assert!(pump_until(&mut [&mut server], |_| {
        client.pump().unwrap();
        client.session_count() == 0
    }));
}

#[test]
fn large_reliable_message_is_fragmented_over_udp() {
    let mut dispatcher = Dispatcher::new(protocol());
    dispatcher
        .on_request::<Echo, _>(|_, echo| Ok(echo))
        .unwrap();
    let transport = TransportKind::Udp;
    let mut server = server_node(transport, dispatcher);
    let mut client = client_node(transport);
    let id = client
        .connect(transport.endpoint(server.local_addr().unwrap()))
        .unwrap();

    // well above one datagram
    let text: String = (0..20_000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
    let mut response = client.call(id, &Echo(text.clone())).unwrap();
    let mut outcome = None;
    assert!(pump_until(&mut [&mut server, &mut client], |_| {
        outcome = response.try_take();
        outcome.is_some()
    }));
    assert_eq!(outcome, Some(Ok(Echo(text))));
}

#[test]
fn many_messages_arrive_in_order() {
    for transport in TransportKind::ALL {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new(protocol());
        let sink = seen.clone();
        dispatcher
            .on_message::<Note, _>(move |_, note| {
                sink.lock().unwrap().push(note.0[0]);
            })
            .unwrap();
        let mut server = server_node(transport, dispatcher);
        let mut client = client_node(transport);
        let id = client
            .connect(transport.endpoint(server.local_addr().unwrap()))
            .unwrap();

        for i in 0..200u32 {
            client.send(id, &Note(vec![(i % 256) as u8])).unwrap();
        }
        assert!(pump_until(&mut [&mut server, &mut client], |_| {
            seen.lock().unwrap().len() == 200
        }));
        let expected: Vec<u8> = (0..200u32).map(|i| (i % 256) as u8).collect();
        assert_eq!(*seen.lock().unwrap(), expected, "{:?}", transport);
    }
}
