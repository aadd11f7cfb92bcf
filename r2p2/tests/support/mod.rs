//! Shared harness for the integration tests: an in-memory `BufferPool` /
//! `IoBackend` pair, a no-op `Timer` (tests fire timeouts by hand via
//! `Engine::on_timer_fired`), and a `Node` that bundles an `Engine` with its
//! own address and outbound queue so two nodes can hand packets to each
//! other without a real socket.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use r2p2::{BufferPool, DatagramBuffer, Engine, EngineConfig, Host, IoBackend, Timer};

const BUF_CAPACITY: usize = r2p2::wire::HEADER_SIZE as usize + r2p2::wire::PAYLOAD_SIZE;

#[derive(Debug, Clone)]
pub struct TestBuffer {
    storage: Vec<u8>,
    len: usize,
}

impl TestBuffer {
    pub fn new() -> Self {
        TestBuffer { storage: vec![0u8; BUF_CAPACITY], len: 0 }
    }
}

impl DatagramBuffer for TestBuffer {
    fn bytes(&self) -> &[u8] {
        &self.storage
    }
    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.storage
    }
    fn len(&self) -> usize {
        self.len
    }
    fn set_len(&mut self, len: usize) {
        self.len = len;
    }
}

#[derive(Default)]
pub struct TestPool;

impl BufferPool for TestPool {
    type Buffer = TestBuffer;

    fn get_buffer(&mut self) -> Option<TestBuffer> {
        Some(TestBuffer::new())
    }

    fn free_buffer(&mut self, _buffer: TestBuffer) {}
}

#[derive(Clone, Default)]
pub struct Outbox(Rc<RefCell<VecDeque<(Host, TestBuffer)>>>);

impl Outbox {
    pub fn drain(&self) -> Vec<(Host, TestBuffer)> {
        self.0.borrow_mut().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }
}

pub struct TestIo {
    outbox: Outbox,
}

impl IoBackend<TestPool> for TestIo {
    type ImplData = ();

    fn prepare_to_send(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn send_chain(&mut self, chain: &[TestBuffer], dest: Host, _impl_data: &mut ()) {
        let mut q = self.outbox.0.borrow_mut();
        for buf in chain {
            q.push_back((dest, buf.clone()));
        }
    }
}

/// A timer that never fires on its own; tests drive timeouts explicitly via
/// `Engine::on_timer_fired(handle)`, so there is nothing for it to track.
#[derive(Default)]
pub struct NoopTimer;

impl Timer for NoopTimer {
    type TimerHandle = ();

    fn arm(&mut self, _duration: Duration) {}
    fn disarm(&mut self, _handle: ()) {}
}

pub type TestEngine<Arg> = Engine<TestPool, TestIo, (), NoopTimer, Arg>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct Node<Arg> {
    pub engine: TestEngine<Arg>,
    pub addr: Host,
    outbox: Outbox,
}

impl<Arg> Node<Arg> {
    pub fn new(ip: u32, port: u16) -> Self {
        Self::with_config(ip, port, EngineConfig::default())
    }

    pub fn with_config(ip: u32, port: u16, config: EngineConfig) -> Self {
        let outbox = Outbox::default();
        let io = TestIo { outbox: outbox.clone() };
        let engine = Engine::new(port, config, TestPool::default(), io, (), NoopTimer::default());
        Node { engine, addr: Host::new(ip, port), outbox }
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    /// Hands every packet currently queued for send to `peer`'s ingress,
    /// as if it had crossed a network. Returns the number of packets moved.
    pub fn deliver_to<B>(&mut self, peer: &mut Node<B>) -> usize {
        let pending = self.outbox.drain();
        let count = pending.len();
        for (_dest, buf) in pending {
            peer.engine.on_packet(buf, self.addr);
        }
        count
    }

    /// Takes the queued outbound packets without delivering them, so a test
    /// can reorder, drop, or relabel the source before injecting them by
    /// hand via `engine.on_packet`.
    pub fn take_outbox(&mut self) -> Vec<(Host, TestBuffer)> {
        self.outbox.drain()
    }
}
