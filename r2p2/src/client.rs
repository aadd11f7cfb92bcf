//! Client-side state machine: one [`ClientPair`] per in-flight outgoing
//! request, driven through `W_ACK` → `W_RESPONSE` (multi-packet requests)
//! or straight to `W_RESPONSE` (single-packet requests).

use crate::message::Message;
use crate::pool::Handle;
use crate::wire::Host;

/// `ctx` from the base spec: the caller-supplied destination, routing
/// policy, callbacks, and opaque argument for one request.
pub struct RequestContext<B, Arg> {
    pub destination: Host,
    pub policy: crate::wire::RoutingPolicy,
    pub success_cb: Box<dyn FnMut(Handle, &mut Arg, &Message<B>)>,
    pub timeout_cb: Box<dyn FnMut(&mut Arg)>,
    pub error_cb: Box<dyn FnMut(&mut Arg, i32)>,
    pub arg: Arg,
    pub tx_timestamp: Option<std::time::Instant>,
    pub rx_timestamp: Option<std::time::Instant>,
}

/// The client-side send state machine (base spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Only the first packet of a multi-packet request has gone out;
    /// waiting for the server's ACK before sending the rest.
    WaitAck,
    /// Waiting for (the rest of) the reply.
    WaitResponse,
}

pub struct ClientPair<B, IO, TimerHandle, Arg> {
    pub ctx: RequestContext<B, Arg>,
    /// The full outgoing request chain, owned for the pair's whole
    /// lifetime. While `state == WaitAck`, only `request[0]` has actually
    /// been transmitted; the rest goes out once the ACK arrives.
    pub request: Vec<B>,
    pub reply: Message<B>,
    pub state: ClientState,
    pub reply_expected_packets: u16,
    pub reply_received_packets: u16,
    pub timer: Option<TimerHandle>,
    pub impl_data: Option<IO>,
}

/// Key identifying a pending client pair. Diverges from the base spec's C
/// source, which keys on `(local_port, req_id)` alone (an acknowledged
/// TODO there) — this includes the peer's address to avoid cross-flow
/// collisions when two different peers happen to race on the same rid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientKey {
    pub local_port: u16,
    pub peer_ip: u32,
    pub peer_port: u16,
    pub req_id: crate::wire::RequestId,
}

impl ClientKey {
    pub fn new(local_port: u16, peer: Host, req_id: crate::wire::RequestId) -> Self {
        ClientKey { local_port, peer_ip: peer.ip, peer_port: peer.port, req_id }
    }
}
