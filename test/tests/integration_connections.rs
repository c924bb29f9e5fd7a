/// Integration tests for connection lifecycle
/// Accepted connections are independent, and closing one resolves exactly
/// its own pending calls

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use courier_service::{
    shared::{ConnectionId, ErrorCode},
    Dispatcher, Node, Responder, RpcError, SessionClosedEvent, SessionOpenedEvent,
};
use courier_test::{
    client_node, protocol, pump_until, pump_while_quiet, server_node, Echo, TransportKind,
};

fn echo_dispatcher() -> Dispatcher {
    let mut dispatcher = Dispatcher::new(protocol());
    dispatcher
        .on_request::<Echo, _>(|_, echo| Ok(echo))
        .unwrap();
    dispatcher
}

type Held = Arc<Mutex<Vec<Responder<Echo>>>>;

/// Answers nothing until the test releases the held Responders
fn holding_dispatcher() -> (Dispatcher, Held) {
    let held: Held = Arc::new(Mutex::new(Vec::new()));
    let mut dispatcher = Dispatcher::new(protocol());
    let sink = held.clone();
    dispatcher
        .on_request_deferred::<Echo, _>(move |_, _, responder| {
            sink.lock().unwrap().push(responder);
        })
        .unwrap();
    (dispatcher, held)
}

fn echo(
    server: &mut Node,
    client: &mut Node,
    id: ConnectionId,
    text: &str,
) -> Result<Echo, RpcError> {
    let mut response = client.call(id, &Echo(text.to_string())).unwrap();
    let mut outcome = None;
    assert!(pump_until(&mut [&mut *server, &mut *client], |_| {
        outcome = response.try_take();
        outcome.is_some()
    }));
    outcome.unwrap()
}

#[test]
fn two_clients_get_distinct_independent_connections() {
    let _ = env_logger::builder().is_test(true).try_init();

    for transport in TransportKind::ALL {
        let mut server = server_node(transport, echo_dispatcher());
        let addr = server.local_addr().unwrap();
        let mut first = client_node(transport);
        let mut second = client_node(transport);
        let first_id = first.connect(transport.endpoint(addr)).unwrap();
        let second_id = second.connect(transport.endpoint(addr)).unwrap();

        assert_eq!(echo(&mut server, &mut first, first_id, "a"), Ok(Echo("a".into())));
        assert_eq!(echo(&mut server, &mut second, second_id, "b"), Ok(Echo("b".into())));

        let accepted: HashSet<ConnectionId> = server.session_ids().collect();
        assert_eq!(accepted.len(), 2, "{:?}", transport);

        first.disconnect(first_id);
        assert_eq!(first.session_count(), 0);

        let mut closed = Vec::new();
        assert!(pump_until(&mut [&mut second], |_| {
            let mut events = server.pump().unwrap();
            closed.extend(events.read::<SessionClosedEvent>());
            !closed.is_empty()
        }));
        assert_eq!(closed.len(), 1, "{:?}", transport);
        assert!(accepted.contains(&closed[0].0));
        assert_eq!(server.session_count(), 1);

        // the other connection is untouched
        assert_eq!(echo(&mut server, &mut second, second_id, "c"), Ok(Echo("c".into())));
    }
}

#[test]
fn client_disconnect_resolves_pending_calls_as_closed() {
    for transport in TransportKind::ALL {
        let (dispatcher, held) = holding_dispatcher();
        let mut server = server_node(transport, dispatcher);
        let mut client = client_node(transport);
        let id = client.connect(transport.endpoint(server.local_addr().unwrap())).unwrap();

        let mut first = client.call(id, &Echo("x".into())).unwrap();
        let mut second = client.call(id, &Echo("y".into())).unwrap();
        assert!(pump_until(&mut [&mut server, &mut client], |_| {
            held.lock().unwrap().len() == 2
        }));
        assert_eq!(client.pending_count(id), 2);

        client.disconnect(id);
        assert_eq!(client.pending_count(id), 0);
        assert_eq!(first.try_take(), Some(Err(RpcError::ChannelClosed)));
        assert_eq!(second.try_take(), Some(Err(RpcError::ChannelClosed)));
    }
}

#[test]
fn server_going_away_closes_the_client_session() {
    let transport = TransportKind::Tcp;
    let (dispatcher, held) = holding_dispatcher();
    let mut server = server_node(transport, dispatcher);
    let mut client = client_node(transport);
    let id = client.connect(transport.endpoint(server.local_addr().unwrap())).unwrap();

    let mut response = client.call(id, &Echo("wait".into())).unwrap();
    assert!(pump_until(&mut [&mut server, &mut client], |_| {
        !held.lock().unwrap().is_empty()
    }));

    server.dispose();
    let mut closed = Vec::new();
    assert!(pump_until(&mut [], |_| {
        let mut events = client.pump().unwrap();
        closed.extend(events.read::<SessionClosedEvent>());
        !closed.is_empty()
    }));
    assert_eq!(closed[0].0, id);
    assert!(closed[0].1.is_transport_fatal());
    assert_eq!(response.try_take(), Some(Err(RpcError::ChannelClosed)));
}

#[test]
fn reply_from_a_replaced_session_is_discarded() {
    let transport = TransportKind::Tcp;
    let (dispatcher, held) = holding_dispatcher();
    let mut server = server_node(transport, dispatcher);
    let mut client = client_node(transport);
    let id = client.connect(transport.endpoint(server.local_addr().unwrap())).unwrap();

    let mut response = client.call(id, &Echo("old".into())).unwrap();
    assert!(pump_until(&mut [&mut server, &mut client], |_| {
        !held.lock().unwrap().is_empty()
    }));

    let server_id = server.session_ids().next().unwrap();
    server.reset_session(server_id).unwrap();
    let responder = held.lock().unwrap().pop().unwrap();
    responder.respond(&Echo("stale".into()));

    pump_while_quiet(&mut [&mut server, &mut client], Duration::from_millis(200));
    assert_eq!(response.try_take(), None);
    assert_eq!(client.pending_count(id), 1);
}

#[test]
fn node_dispose_is_idempotent() {
    let mut server = server_node(TransportKind::Tcp, echo_dispatcher());
    let mut client = client_node(TransportKind::Tcp);
    let id = client.connect(TransportKind::Tcp.endpoint(server.local_addr().unwrap())).unwrap();
    let mut response = client.call(id, &Echo("never".into())).unwrap();

    client.dispose();
    client.dispose();

    assert_eq!(client.session_count(), 0);
    assert!(client.service().is_disposed());
    assert_eq!(response.try_take(), Some(Err(RpcError::ChannelClosed)));
    assert!(client.pump().unwrap().is_empty());

    server.dispose();
    assert!(server.pump().unwrap().is_empty());
}

#[test]
fn outbound_connect_reports_opened_session() {
    for transport in TransportKind::ALL {
        let mut server = server_node(transport, echo_dispatcher());
        let mut client = client_node(transport);
        let id = client.connect(transport.endpoint(server.local_addr().unwrap())).unwrap();

        let mut opened = Vec::new();
        assert!(pump_until(&mut [&mut server], |_| {
            let mut events = client.pump().unwrap();
            opened.extend(events.read::<SessionOpenedEvent>());
            !opened.is_empty()
        }));
        assert_eq!(opened, vec![(id, None)], "{:?}", transport);
        assert!(client.service().channel(id).unwrap().is_connected());
    }
}

#[test]
fn connect_to_closed_port_fails_the_session() {
    let transport = TransportKind::Tcp;
    // bind then drop, leaving a port nobody listens on
    let addr = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();
    let mut client = client_node(transport);
    let id = client.connect(transport.endpoint(addr)).unwrap();
    let mut response = client.call(id, &Echo("nobody".into())).unwrap();

    let mut closed = Vec::new();
    assert!(pump_until(&mut [], |_| {
        let mut events = client.pump().unwrap();
        closed.extend(events.read::<SessionClosedEvent>());
        !closed.is_empty()
    }));
    assert_eq!(closed, vec![(id, ErrorCode::ConnectFailed)]);
    assert_eq!(response.try_take(), Some(Err(RpcError::ChannelClosed)));
}
