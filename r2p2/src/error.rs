use thiserror::Error;

use crate::wire::HeaderError;

/// Errors the engine can report. Matches the error table in the protocol
/// design one variant per row; timeout is deliberately absent here because
/// it is delivered through `timeout_cb`, not as an `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum R2p2Error {
    /// `len < header_size`; the datagram was dropped before decoding.
    #[error("undersized datagram: {0}")]
    UndersizedDatagram(#[from] HeaderError),

    /// No pending pair matches the incoming datagram's identity.
    #[error("no pending request matches rid {0}")]
    UnknownRequestId(crate::wire::RequestId),

    /// A non-first packet's `p_order` did not equal the expected ordinal.
    #[error("packet arrived out of order: expected ordinal {expected}, got {got}")]
    OutOfOrderPacket { expected: u16, got: u16 },

    /// The last packet arrived but the received count never matched the
    /// count announced by the first packet.
    #[error("packet count mismatch: expected {expected}, received {received}")]
    PacketCountMismatch { expected: u16, received: u16 },

    /// A fixed-size per-core pool had no free slots.
    #[error("{0} pool exhausted (capacity {1})")]
    PoolExhausted(&'static str, usize),

    /// `IoBackend::prepare_to_send` returned an error before the request
    /// could be transmitted.
    #[error("I/O backend failed to prepare request: {0}")]
    IoPrepareFailed(String),

    /// A message's total packet count would exceed the scratch iovec bound.
    #[error("message needs {0} packets, exceeding the {1}-packet limit")]
    TooManyPackets(usize, usize),

    /// A handle referred to a pool slot that has since been freed and
    /// possibly reused (generation mismatch).
    #[error("stale handle: slot {0} generation {1} no longer live")]
    StaleHandle(u32, u32),
}
