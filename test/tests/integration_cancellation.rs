/// Integration tests for call cancellation
/// A canceled call resolves at once, and its late response is dropped

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use courier_service::{
    shared::ErrorCode, CancellationToken, Dispatcher, Node, Responder, RpcError,
};
use courier_test::{
    client_node, protocol, pump_until, pump_while_quiet, server_node, Echo, TransportKind,
};

type Held = Arc<Mutex<Vec<Responder<Echo>>>>;

fn holding_server(transport: TransportKind) -> (Node, Held) {
    let held: Held = Arc::new(Mutex::new(Vec::new()));
    let mut dispatcher = Dispatcher::new(protocol());
    let sink = held.clone();
    dispatcher
        .on_request_deferred::<Echo, _>(move |_, _, responder| {
            sink.lock().unwrap().push(responder);
        })
        .unwrap();
    (server_node(transport, dispatcher), held)
}

#[test]
fn late_response_to_canceled_call_is_dropped() {
    let _ = env_logger::builder().is_test(true).try_init();

    for transport in TransportKind::ALL {
        let (mut server, held) = holding_server(transport);
        let mut client = client_node(transport);
        let id = client.connect(transport.endpoint(server.local_addr().unwrap())).unwrap();

        let mut canceled = client.call(id, &Echo("slow".into())).unwrap();
        assert!(pump_until(&mut [&mut server, &mut client], |_| {
            !held.lock().unwrap().is_empty()
        }));

        assert!(client.cancel(id, canceled.correlation_id()));
        assert!(!client.cancel(id, canceled.correlation_id()));
        assert_eq!(canceled.try_take(), Some(Err(RpcError::Canceled)));
        assert_eq!(client.pending_count(id), 0);

        // the server answers anyway
        let responder = held.lock().unwrap().pop().unwrap();
        responder.respond(&Echo("too late".into()));
        pump_while_quiet(&mut [&mut server, &mut client], Duration::from_millis(100));
        assert_eq!(client.pending_count(id), 0);

        // and the connection keeps working
        let mut next = client.call(id, &Echo("next".into())).unwrap();
        assert!(pump_until(&mut [&mut server, &mut client], |_| {
            !held.lock().unwrap().is_empty()
        }));
        held.lock().unwrap().pop().unwrap().respond(&Echo("next".into()));
        let mut outcome = None;
        assert!(pump_until(&mut [&mut server, &mut client], |_| {
            outcome = next.try_take();
            outcome.is_some()
        }));
        assert_eq!(outcome, Some(Ok(Echo("next".into()))), "{:?}", transport);
    }
}

#[test]
fn canceled_token_resolves_call_on_next_pump() {
    let (mut server, held) = holding_server(TransportKind::Tcp);
    let mut client = client_node(TransportKind::Tcp);
    let id = client
        .connect(TransportKind::Tcp.endpoint(server.local_addr().unwrap()))
        .unwrap();

    let token = CancellationToken::new();
    let mut response = client
        .call_with_cancel(id, &Echo("token".into()), token.clone())
        .unwrap();
    assert!(pump_until(&mut [&mut server, &mut client], |_| {
        !held.lock().unwrap().is_empty()
    }));
    assert_eq!(response.try_take(), None);

    token.cancel();
    client.pump().unwrap();
    assert_eq!(response.try_take(), Some(Err(RpcError::Canceled)));
    assert_eq!(client.pending_count(id), 0);
}

#[test]
fn deferred_reply_from_another_thread_is_delivered() {
    let (mut server, held) = holding_server(TransportKind::Udp);
    let mut client = client_node(TransportKind::Udp);
    let id = client
        .connect(TransportKind::Udp.endpoint(server.local_addr().unwrap()))
        .unwrap();

    let mut response = client.call(id, &Echo("threaded".into())).unwrap();
    assert!(pump_until(&mut [&mut server, &mut client], |_| {
        !held.lock().unwrap().is_empty()
    }));

    let responder = held.lock().unwrap().pop().unwrap();
    std::thread::spawn(move || responder.respond(&Echo("from worker".into())))
        .join()
        .unwrap();

    let mut outcome = None;
    assert!(pump_until(&mut [&mut server, &mut client], |_| {
        outcome = response.try_take();
        outcome.is_some()
    }));
    assert_eq!(outcome, Some(Ok(Echo("from worker".into()))));
}

#[test]
fn dropped_responder_fails_the_call() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut dispatcher = Dispatcher::new(protocol());
    dispatcher
        .on_request_deferred::<Echo, _>(|_, _, responder| drop(responder))
        .unwrap();
    let mut server = server_node(TransportKind::Tcp, dispatcher);
    let mut client = client_node(TransportKind::Tcp);
    let id = client
        .connect(TransportKind::Tcp.endpoint(server.local_addr().unwrap()))
        .unwrap();

    let mut response = client.call(id, &Echo("forgotten".into())).unwrap();
    let mut outcome = None;
    assert!(pump_until(&mut [&mut server, &mut client], |_| {
        outcome = response.try_take();
        outcome.is_some()
    }));
    match outcome {
        Some(Err(RpcError::Remote { code, message })) => {
            assert_eq!(code, ErrorCode::HandlerFailed);
            assert!(message.contains("without a reply"), "{}", message);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(client.pending_count(id), 0);
}
