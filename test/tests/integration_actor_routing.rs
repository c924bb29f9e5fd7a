/// Integration tests for actor-addressed frames between processes
/// Frames for a remote actor are forwarded with the ActorId untouched and
/// the response travels back to the original caller

use courier_service::{
    shared::{ActorId, Address, ErrorCode},
    Dispatcher, HandlerError, Node, ResponseFuture, RpcError,
};
use courier_test::{inner_node, protocol, pump_until, Bump, Count, TransportKind};

struct Counter(u32);

const FRONT: Address = Address::new(1, 0);
const RELAY: Address = Address::new(2, 0);
const HOST: Address = Address::new(3, 0);

fn counting_dispatcher() -> Dispatcher {
    let mut dispatcher = Dispatcher::new(protocol());
    dispatcher
        .on_request::<Bump, _>(|context, bump| {
            let counter = context
                .actor_mut::<Counter>()
                .ok_or_else(|| HandlerError::failed("not addressed to a counter"))?;
            counter.0 += bump.0;
            Ok(Count(counter.0))
        })
        .unwrap();
    dispatcher
}

fn resolve(
    nodes: &mut [&mut Node],
    mut response: ResponseFuture<Count>,
) -> Result<Count, RpcError> {
    let mut outcome = None;
    assert!(pump_until(nodes, |_| {
        outcome = response.try_take();
        outcome.is_some()
    }));
    outcome.unwrap()
}

#[test]
fn call_reaches_actor_on_directly_routed_process() {
    let _ = env_logger::builder().is_test(true).try_init();

    for transport in TransportKind::ALL {
        let mut host = inner_node(transport, HOST, counting_dispatcher());
        let actor = host.register_actor(7, Counter(0));
        assert_eq!(actor, ActorId::new(HOST, 7));

        let mut front = inner_node(transport, FRONT, Dispatcher::new(protocol()));
        front
            .router_mut()
            .add_route(HOST, transport.endpoint(host.local_addr().unwrap()));

        let first = front.call_actor(actor, &Bump(2)).unwrap();
        assert_eq!(resolve(&mut [&mut host, &mut front], first), Ok(Count(2)));
        let second = front.call_actor(actor, &Bump(3)).unwrap();
        assert_eq!(
            resolve(&mut [&mut host, &mut front], second),
            Ok(Count(5)),
            "{:?}",
            transport
        );
    }
}

#[test]
fn call_is_relayed_through_intermediate_process() {
    let transport = TransportKind::Tcp;
    let mut host = inner_node(transport, HOST, counting_dispatcher());
    let actor = host.register_actor(7, Counter(10));

    let mut relay = inner_node(transport, RELAY, Dispatcher::new(protocol()));
    relay
        .router_mut()
        .add_route(HOST, transport.endpoint(host.local_addr().unwrap()));

    let mut front = inner_node(transport, FRONT, Dispatcher::new(protocol()));
    // the front process only knows the relay
    front
        .router_mut()
        .add_route(HOST, transport.endpoint(relay.local_addr().unwrap()));

    let response = front.call_actor(actor, &Bump(1)).unwrap();
    assert_eq!(
        resolve(&mut [&mut host, &mut relay, &mut front], response),
        Ok(Count(11))
    );
    // relay kept no dangling calls
    assert!(relay.session_ids().all(|id| relay.pending_count(id) == 0));
}

#[test]
fn unknown_actor_on_host_is_an_error_response() {
    let transport = TransportKind::Tcp;
    let mut host = inner_node(transport, HOST, counting_dispatcher());
    let mut front = inner_node(transport, FRONT, Dispatcher::new(protocol()));
    front
        .router_mut()
        .add_route(HOST, transport.endpoint(host.local_addr().unwrap()));

    let response = front.call_actor(ActorId::new(HOST, 404), &Bump(1)).unwrap();
    let outcome = resolve(&mut [&mut host, &mut front], response);
    assert!(matches!(
        outcome,
        Err(RpcError::Remote { code: ErrorCode::ActorNotFound, .. })
    ));
}

#[test]
fn relay_without_route_answers_with_error() {
    let transport = TransportKind::Tcp;
    let mut relay = inner_node(transport, RELAY, Dispatcher::new(protocol()));
    let mut front = inner_node(transport, FRONT, Dispatcher::new(protocol()));
    front
        .router_mut()
        .add_route(HOST, transport.endpoint(relay.local_addr().unwrap()));

    let response = front.call_actor(ActorId::new(HOST, 1), &Bump(1)).unwrap();
    let outcome = resolve(&mut [&mut relay, &mut front], response);
    assert!(matches!(
        outcome,
        Err(RpcError::Remote { code: ErrorCode::ActorNotFound, .. })
    ));
}
