//! A multi-packet request sends only its first packet until the server's
//! ACK authorizes the rest of the burst.

mod support;

use r2p2::{Message, RequestContext, RoutingPolicy};
use support::{Node, TestBuffer};

#[test]
fn only_first_packet_sent_before_ack() {
    support::init_tracing();
    let mut server: Node<()> = Node::new(0x7f000001, 9100);
    server.engine.set_recv_cb(Box::new(|_handle, _msg: &Message<TestBuffer>| {}));
    let mut client: Node<()> = Node::new(0x7f000001, 9101);

    let big_payload = vec![7u8; r2p2::wire::PAYLOAD_SIZE * 3];
    let ctx = RequestContext {
        destination: server.addr,
        policy: RoutingPolicy::FixedRoute,
        success_cb: Box::new(|_h, _a, _m: &Message<TestBuffer>| {}),
        timeout_cb: Box::new(|_a| {}),
        error_cb: Box::new(|_a, _c| {}),
        arg: (),
        tx_timestamp: None,
        rx_timestamp: None,
    };

    client.engine.send_req(&[&big_payload], ctx).expect("send_req");
    assert_eq!(client.outbox_len(), 1, "only the first packet of a multi-packet burst goes out up front");

    let moved = client.deliver_to(&mut server);
    assert_eq!(moved, 1);

    // The server answers a multi-packet first packet with an ACK, never
    // dispatching to the recv callback until the whole request arrives.
    assert_eq!(server.outbox_len(), 1, "server queued exactly one ACK");
    server.deliver_to(&mut client);

    // The ACK has released the remaining packets of the burst.
    assert!(client.outbox_len() > 1, "rest of the burst released after ACK");
}
