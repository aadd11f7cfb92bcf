//! The per-core facade: owns the client/server pools, the pending tables,
//! the request-id PRNG, and wires dispatch, segmentation, and reassembly
//! together. One `Engine` per core; nothing here reaches across cores —
//! that isolation is enforced by plain ownership, not a runtime check.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace, warn};

use crate::client::{ClientKey, ClientPair, ClientState, RequestContext};
use crate::config::EngineConfig;
use crate::error::R2p2Error;
use crate::io::{IoBackend, Router, Timer};
use crate::message::{self, BufferPool, DatagramBuffer, Message};
use crate::pool::{Handle, Pool};
use crate::server::{ServerKey, ServerPair};
use crate::wire::{Header, MessageType, RequestId, RoutingPolicy};

/// The application-supplied request handler, invoked once a server pair's
/// request is fully reassembled (or immediately, for single-packet
/// requests). `Handle` identifies the pair so the application can later
/// call [`Engine::send_response`].
pub type RecvCallback<B> = Box<dyn FnMut(Handle, &Message<B>)>;

pub struct Engine<P, IO, R, T, Arg>
where
    P: BufferPool,
    IO: IoBackend<P>,
    T: Timer,
{
    config: EngineConfig,
    local_port: u16,
    pool: P,
    io: IO,
    router: R,
    timer: T,
    rng: StdRng,

    client_pool: Pool<ClientPair<P::Buffer, IO::ImplData, T::TimerHandle, Arg>>,
    client_pending: HashMap<ClientKey, Handle>,

    server_pool: Pool<ServerPair<P::Buffer>>,
    server_pending: HashMap<ServerKey, Handle>,

    /// Replies delivered to the application but not yet acknowledged via
    /// [`Engine::recv_resp_done`]; the handle stays valid for this lookup
    /// even though the client pair itself has already been freed.
    live_replies: HashMap<Handle, Message<P::Buffer>>,

    recv_cb: Option<RecvCallback<P::Buffer>>,
}

impl<P, IO, R, T, Arg> Engine<P, IO, R, T, Arg>
where
    P: BufferPool,
    IO: IoBackend<P>,
    T: Timer,
{
    /// `init_per_core`: creates the pools and seeds the PRNG for one core.
    pub fn new(local_port: u16, config: EngineConfig, pool: P, io: IO, router: R, timer: T) -> Self {
        Engine {
            client_pool: Pool::new("client", config.client_pool_size),
            server_pool: Pool::new("server", config.server_pool_size),
            config,
            local_port,
            pool,
            io,
            router,
            timer,
            rng: StdRng::from_entropy(),
            client_pending: HashMap::new(),
            server_pending: HashMap::new(),
            live_replies: HashMap::new(),
            recv_cb: None,
        }
    }

    pub fn set_recv_cb(&mut self, cb: RecvCallback<P::Buffer>) {
        self.recv_cb = Some(cb);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn client_pool_len(&self) -> usize {
        self.client_pool.len()
    }

    pub fn server_pool_len(&self) -> usize {
        self.server_pool.len()
    }
}

impl<P, IO, R, T, Arg> Engine<P, IO, R, T, Arg>
where
    P: BufferPool,
    P::Buffer: DatagramBuffer,
    IO: IoBackend<P>,
    R: Router,
    T: Timer,
{
    fn fresh_request_id(&mut self, peer: crate::wire::Host) -> RequestId {
        loop {
            let candidate = RequestId(self.rng.gen());
            let key = ClientKey::new(self.local_port, peer, candidate);
            if !self.client_pending.contains_key(&key) {
                return candidate;
            }
        }
    }

    /// Frees the pool slot, removes the pending-table entry, and disarms
    /// the pair's timer (if still armed). Buffers and I/O backend state are
    /// the caller's responsibility — what's left to release depends on why
    /// the pair is being torn down.
    fn free_client(&mut self, handle: Handle) -> Option<ClientPair<P::Buffer, IO::ImplData, T::TimerHandle, Arg>> {
        let mut pair = self.client_pool.free(handle).ok()?;
        let key = ClientKey::new(self.local_port, pair.ctx.destination, pair.reply.req_id);
        self.client_pending.remove(&key);
        if let Some(timer_handle) = pair.timer.take() {
            self.timer.disarm(timer_handle);
        }
        Some(pair)
    }

    fn teardown_server(&mut self, handle: Handle) {
        if let Ok(pair) = self.server_pool.free(handle) {
            let key = ServerKey::new(pair.request.sender, pair.request.req_id);
            self.server_pending.remove(&key);
            pair.request.release(&mut self.pool);
        }
    }

    // ---- client engine (base spec §4.2) -----------------------------------

    /// `send_req`: allocates a client pair, sends only the first packet of
    /// the request, and arms its timeout.
    pub fn send_req(
        &mut self,
        iov: &[&[u8]],
        ctx: RequestContext<P::Buffer, Arg>,
    ) -> Result<Handle, R2p2Error> {
        let destination = ctx.destination;
        let mut impl_data = match self.io.prepare_to_send() {
            Ok(d) => d,
            Err(e) => return Err(R2p2Error::IoPrepareFailed(e)),
        };

        let req_id = self.fresh_request_id(destination);
        let chain = match message::prepare_message(&mut self.pool, iov, MessageType::Request, ctx.policy, req_id) {
            Ok(chain) => chain,
            Err(e) => {
                self.io.release(impl_data);
                return Err(e);
            }
        };

        // Checked ahead of the send so a pool-exhaustion failure never
        // leaves an armed timer or a transmitted burst with nothing to
        // track it: `Pool::alloc` takes `pair` by value and drops it
        // whole on error, past the point where its pieces could still be
        // released individually.
        if self.client_pool.len() >= self.client_pool.capacity() {
            warn!(?req_id, "client pool exhausted, dropping request");
            self.io.release(impl_data);
            for buf in chain {
                self.pool.free_buffer(buf);
            }
            return Err(R2p2Error::PoolExhausted("client", self.client_pool.capacity()));
        }

        self.io.send_chain(&chain[0..1], destination, &mut impl_data);

        let state = if chain.len() == 1 { ClientState::WaitResponse } else { ClientState::WaitAck };
        let timer_handle = self.timer.arm(self.config.default_timeout);

        let pair = ClientPair {
            ctx,
            request: chain,
            reply: Message::new(destination, req_id),
            state,
            reply_expected_packets: 0,
            reply_received_packets: 0,
            timer: Some(timer_handle),
            impl_data: Some(impl_data),
        };

        let key = ClientKey::new(self.local_port, destination, req_id);
        let handle = self.client_pool.alloc(pair).expect("capacity checked above");
        self.client_pending.insert(key, handle);
        trace!(?req_id, %destination, "request sent");
        Ok(handle)
    }

    /// `on_response`: routes an incoming RESPONSE/ACK packet to its pair.
    fn on_response(&mut self, buf: P::Buffer, header: Header, source: crate::wire::Host) {
        let key = ClientKey::new(self.local_port, source, header.rid);
        let Some(&handle) = self.client_pending.get(&key) else {
            debug!(rid = %header.rid, "response for unknown request, dropping");
            self.pool.free_buffer(buf);
            return;
        };

        let is_ack_body = message::is_ack_body(buf.body());
        let state = match self.client_pool.get(handle) {
            Ok(pair) => pair.state,
            Err(_) => {
                self.pool.free_buffer(buf);
                return;
            }
        };

        match state {
            ClientState::WaitAck => {
                if !is_ack_body {
                    // Not the ACK we were waiting for; treat as an ordering
                    // violation on this request.
                    self.pool.free_buffer(buf);
                    self.fail_client(handle, -1);
                    return;
                }
                self.pool.free_buffer(buf);
                let pair = self.client_pool.get_mut(handle).expect("just checked live");
                let destination = pair.ctx.destination;
                let rest: Vec<P::Buffer> = pair.request.drain(1..).collect();
                pair.request.clear();
                pair.state = ClientState::WaitResponse;
                if let Some(impl_data) = pair.impl_data.as_mut() {
                    self.io.send_chain(&rest, destination, impl_data);
                }
                // The burst has left; we no longer need to keep these
                // buffers around for resend (no retransmission in scope).
                for b in rest {
                    self.pool.free_buffer(b);
                }
            }
            ClientState::WaitResponse => self.on_reply_packet(handle, buf, header),
        }
    }

    fn on_reply_packet(&mut self, handle: Handle, buf: P::Buffer, header: Header) {
        if header.is_first() {
            if header.packet_count() as usize > crate::wire::MAX_PACKETS_PER_MESSAGE {
                self.pool.free_buffer(buf);
                self.fail_client(handle, -1);
                return;
            }
            let pair = self.client_pool.get_mut(handle).expect("live handle");
            pair.reply_expected_packets = header.packet_count();
            pair.reply_received_packets = 1;
            pair.reply.push(buf);
        } else {
            let expected = match self.client_pool.get(handle) {
                Ok(pair) => pair.reply_received_packets,
                Err(_) => {
                    self.pool.free_buffer(buf);
                    return;
                }
            };
            if header.ordinal() != expected {
                self.pool.free_buffer(buf);
                self.fail_client(handle, -1);
                return;
            }
            let pair = self.client_pool.get_mut(handle).expect("live handle");
            pair.reply_received_packets += 1;
            pair.reply.push(buf);
        }

        let (is_last, received, expected_count) = {
            let pair = self.client_pool.get(handle).expect("live handle");
            (
                pair.reply.chain.last().map(|b| b.header().ok()).flatten().map(|h| h.is_last()).unwrap_or(false),
                pair.reply_received_packets,
                pair.reply_expected_packets,
            )
        };
        if !is_last {
            return;
        }
        if received != expected_count {
            self.fail_client(handle, -1);
            return;
        }

        if let Some(mut pair) = self.free_client(handle) {
            if let Some(impl_data) = pair.impl_data.take() {
                self.io.release(impl_data);
            }
            for b in pair.request.drain(..) {
                self.pool.free_buffer(b);
            }
            (pair.ctx.success_cb)(handle, &mut pair.ctx.arg, &pair.reply);
            // The application owns `handle` until it calls
            // `recv_resp_done`; the reply buffers stay alive until then.
            self.live_replies.insert(handle, pair.reply);
        }
    }

    fn fail_client(&mut self, handle: Handle, code: i32) {
        if let Some(mut pair) = self.free_client(handle) {
            if let Some(impl_data) = pair.impl_data.take() {
                self.io.release(impl_data);
            }
            for b in pair.request.drain(..) {
                self.pool.free_buffer(b);
            }
            pair.reply.release(&mut self.pool);
            (pair.ctx.error_cb)(&mut pair.ctx.arg, code);
        }
    }

    /// `timer_triggered`: the external timer edge. A no-op if the pair has
    /// already been freed (the generation in `handle` will have moved on).
    pub fn on_timer_fired(&mut self, handle: Handle) {
        if !self.client_pool.is_live(handle) {
            return;
        }
        if let Some(mut pair) = self.free_client(handle) {
            if let Some(impl_data) = pair.impl_data.take() {
                self.io.release(impl_data);
            }
            for b in pair.request.drain(..) {
                self.pool.free_buffer(b);
            }
            pair.reply.release(&mut self.pool);
            (pair.ctx.timeout_cb)(&mut pair.ctx.arg);
        }
    }

    /// `recv_resp_done`: the application is done with a delivered reply.
    pub fn recv_resp_done(&mut self, handle: Handle) {
        if let Some(reply) = self.live_replies.remove(&handle) {
            reply.release(&mut self.pool);
        }
    }

    // ---- server engine (base spec §4.3) -----------------------------------

    fn on_request(&mut self, buf: P::Buffer, header: Header, source: crate::wire::Host) {
        if header.is_first() {
            if header.packet_count() as usize > crate::wire::MAX_PACKETS_PER_MESSAGE {
                self.pool.free_buffer(buf);
                return;
            }
            let key = ServerKey::new(source, header.rid);
            if let Some(&existing) = self.server_pending.get(&key) {
                // Duplicate first packet for a live pair: the peer is
                // treated as having restarted the request.
                self.teardown_server(existing);
            }

            let expected = header.packet_count();
            let mut pair = ServerPair::new(source, header.rid, expected);
            let last = header.is_last();
            pair.request_received_packets = 1;
            pair.request.push(buf);

            if last {
                let handle = match self.server_pool.alloc(pair) {
                    Ok(h) => h,
                    Err(_) => return,
                };
                self.dispatch_request(handle);
            } else {
                match self.server_pool.alloc(pair) {
                    Ok(handle) => {
                        self.server_pending.insert(key, handle);
                        self.send_ack(header.rid, source);
                    }
                    Err(_) => {}
                }
            }
        } else {
            let key = ServerKey::new(source, header.rid);
            let Some(&handle) = self.server_pending.get(&key) else {
                self.pool.free_buffer(buf);
                return;
            };
            let expected_ordinal = match self.server_pool.get(handle) {
                Ok(pair) => pair.request_received_packets,
                Err(_) => {
                    self.pool.free_buffer(buf);
                    return;
                }
            };
            if header.ordinal() != expected_ordinal {
                self.pool.free_buffer(buf);
                self.teardown_server(handle);
                return;
            }

            let is_last = header.is_last();
            {
                let pair = self.server_pool.get_mut(handle).expect("live handle");
                pair.request_received_packets += 1;
                pair.request.push(buf);
            }

            if !is_last {
                return;
            }

            let (received, expected_count) = {
                let pair = self.server_pool.get(handle).expect("live handle");
                (pair.request_received_packets, pair.request_expected_packets)
            };
            if received != expected_count {
                self.teardown_server(handle);
                return;
            }
            self.dispatch_request(handle);
        }
    }

    fn dispatch_request(&mut self, handle: Handle) {
        if let Ok(pair) = self.server_pool.get(handle) {
            if let Some(cb) = self.recv_cb.as_mut() {
                cb(handle, &pair.request);
            }
        }
    }

    fn send_ack(&mut self, req_id: RequestId, destination: crate::wire::Host) {
        match message::prepare_ack(&mut self.pool, req_id) {
            Ok(ack) => {
                // The ACK is transient: it needs no backend-attached state,
                // so a throwaway `prepare_to_send` result is fine here.
                if let Ok(mut impl_data) = self.io.prepare_to_send() {
                    self.io.send_chain(std::slice::from_ref(&ack), destination, &mut impl_data);
                    self.io.release(impl_data);
                }
                self.pool.free_buffer(ack);
            }
            Err(_) => warn!("buffer pool exhausted sending ACK"),
        }
    }

    /// `send_response`: the application's reply to a server-dispatched
    /// request. A no-op removal from the pending table if the request was
    /// single-packet and never inserted there.
    pub fn send_response(&mut self, handle: Handle, iov: &[&[u8]]) -> Result<(), R2p2Error> {
        let (destination, req_id) = {
            let pair = self.server_pool.get(handle)?;
            (pair.request.sender, pair.request.req_id)
        };
        let chain = message::prepare_message(&mut self.pool, iov, MessageType::Response, RoutingPolicy::FixedRoute, req_id)?;
        if let Ok(mut impl_data) = self.io.prepare_to_send() {
            self.io.send_chain(&chain, destination, &mut impl_data);
            self.io.release(impl_data);
        }
        for buf in chain {
            self.pool.free_buffer(buf);
        }
        self.router.notify();
        self.teardown_server(handle);
        Ok(())
    }

    // ---- dispatch (base spec §4.4) -----------------------------------------

    /// `on_packet`: the single ingress entrypoint. `buf` must already hold
    /// the received datagram (header included) and `source` its sender.
    pub fn on_packet(&mut self, buf: P::Buffer, source: crate::wire::Host) {
        if buf.len() < crate::wire::HEADER_SIZE as usize {
            debug!(len = buf.len(), "undersized datagram dropped");
            self.pool.free_buffer(buf);
            return;
        }
        let header = match Header::decode(&buf.bytes()[..buf.len()]) {
            Ok(h) => h,
            Err(e) => {
                debug!(error = %e, "malformed header, datagram dropped");
                self.pool.free_buffer(buf);
                return;
            }
        };
        match header.msg_type {
            MessageType::Response | MessageType::Ack => self.on_response(buf, header, source),
            MessageType::Request => self.on_request(buf, header, source),
        }
    }
}
