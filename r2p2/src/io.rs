//! Traits for the collaborators this crate never implements itself: the
//! datagram I/O backend, the router feedback channel, the timer wheel, and
//! (optionally) hardware/software timestamping.

use crate::message::BufferPool;
use crate::wire::Host;

/// Transmits prepared packet chains and prepares per-pair backend state
/// (e.g. a socket) before the first packet of a request goes out.
pub trait IoBackend<P: BufferPool> {
    /// Backend-owned state attached to a client pair for its lifetime
    /// (e.g. a socket file descriptor).
    type ImplData;

    /// Called once per outbound request, before anything is sent. On
    /// success, returns the backend state to attach to the pair.
    fn prepare_to_send(&mut self) -> Result<Self::ImplData, String>;

    /// Sends every buffer in `chain`, in order, to `dest`.
    fn send_chain(&mut self, chain: &[P::Buffer], dest: Host, impl_data: &mut Self::ImplData);

    /// Releases backend state attached to a pair at teardown.
    fn release(&mut self, impl_data: Self::ImplData) {
        let _ = impl_data;
    }
}

/// Opaque side channel consumed by an external load-balancer; notified
/// after every reply send and nothing else.
pub trait Router {
    fn notify(&mut self);
}

/// A no-op router for callers that don't steer traffic.
impl Router for () {
    fn notify(&mut self) {}
}

/// A cancellable per-request timeout, owned by the surrounding runtime.
/// The engine only ever arms one timer per client pair and disarms it on
/// successful reply receipt; `Engine::on_timer_fired` is the external edge
/// that reports expiry back in.
pub trait Timer {
    type TimerHandle;

    fn arm(&mut self, duration: std::time::Duration) -> Self::TimerHandle;
    fn disarm(&mut self, handle: Self::TimerHandle);
}

/// Compares two timestamps, used to decide whether a newly observed rx
/// timestamp supersedes the one already recorded on a client context.
pub trait Timestamps: Copy {
    fn is_newer_than(self, other: Self) -> bool;
}

impl Timestamps for std::time::Instant {
    fn is_newer_than(self, other: Self) -> bool {
        self > other
    }
}
