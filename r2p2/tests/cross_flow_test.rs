//! Pins the deliberate divergence from the base protocol's port-only
//! client lookup key: a response is matched by `(local_port, peer_ip,
//! peer_port, req_id)`, so a datagram claiming an in-flight `req_id` but
//! arriving from the wrong peer must not be mistaken for the real reply.

mod support;

use std::cell::RefCell;
use std::rc::Rc;

use r2p2::{DatagramBuffer, Message, MessageType, RequestContext, RoutingPolicy};
use support::{Node, TestBuffer, TestPool};

#[test]
fn response_from_wrong_peer_is_not_matched_by_req_id_alone() {
    support::init_tracing();
    let real_peer: Node<()> = Node::new(0x7f000001, 9600);
    let impostor_peer: Node<()> = Node::new(0x7f000002, 9601); // different IP
    let mut client: Node<()> = Node::new(0x7f000001, 9602);

    let success_count = Rc::new(RefCell::new(0));
    let success_counter = success_count.clone();
    let ctx = RequestContext {
        destination: real_peer.addr,
        policy: RoutingPolicy::FixedRoute,
        success_cb: Box::new(move |_h, _a, _m: &Message<TestBuffer>| {
            *success_counter.borrow_mut() += 1;
        }),
        timeout_cb: Box::new(|_a| {}),
        error_cb: Box::new(|_a, _c| {}),
        arg: (),
        tx_timestamp: None,
        rx_timestamp: None,
    };

    client.engine.send_req(&[b"hi"], ctx).expect("send_req");
    let outgoing = client.take_outbox();
    assert_eq!(outgoing.len(), 1);
    let req_id = outgoing[0].1.header().unwrap().rid;

    // A minimal, valid single-packet RESPONSE carrying the real peer's
    // req_id — built directly rather than through a live server engine.
    let mut pool = TestPool::default();
    let forged = r2p2::message::prepare_message(&mut pool, &[b"forged"], MessageType::Response, RoutingPolicy::FixedRoute, req_id)
        .unwrap()
        .remove(0);

    client.engine.on_packet(forged.clone(), impostor_peer.addr);
    assert_eq!(*success_count.borrow(), 0, "response from the wrong peer must be dropped");

    client.engine.on_packet(forged, real_peer.addr);
    assert_eq!(*success_count.borrow(), 1, "the same bytes from the right peer must be matched");
}
