//! Header-aware message framing: turning a scatter-gather payload into a
//! chain of wire-ready packets ([`prepare_message`]), and the reverse view
//! back into application bytes ([`Message::scatter`]).

use smallvec::SmallVec;

use crate::error::R2p2Error;
use crate::wire::{
    Flags, Header, MessageType, RequestId, RoutingPolicy, ACK_BODY, HEADER_SIZE,
    MAX_PACKETS_PER_MESSAGE, MIN_PAYLOAD_SIZE, PAYLOAD_SIZE,
};

/// A single datagram-sized buffer, owned by whichever [`Message`] it is
/// chained into. `bytes`/`bytes_mut` expose the *whole* datagram, header
/// included; [`Message::scatter`] is what skips past the header.
pub trait DatagramBuffer {
    fn bytes(&self) -> &[u8];
    fn bytes_mut(&mut self) -> &mut [u8];
    fn len(&self) -> usize;
    fn set_len(&mut self, len: usize);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn header(&self) -> Result<Header, crate::wire::HeaderError> {
        Header::decode(&self.bytes()[..self.len()])
    }

    fn body(&self) -> &[u8] {
        &self.bytes()[HEADER_SIZE as usize..self.len()]
    }
}

/// External collaborator: acquires and releases datagram-sized buffers.
/// The core never allocates memory itself; every buffer comes from here.
pub trait BufferPool {
    type Buffer: DatagramBuffer;

    fn get_buffer(&mut self) -> Option<Self::Buffer>;
    fn free_buffer(&mut self, buffer: Self::Buffer);
}

/// An ordered chain of buffers plus the request identity it belongs to.
pub struct Message<B> {
    pub chain: Vec<B>,
    pub sender: crate::wire::Host,
    pub req_id: RequestId,
}

/// Inline capacity for the scatter view handed to application callbacks;
/// this is well above what a typical request/reply needs, so the common
/// case never touches the heap. The hard ceiling is `MAX_PACKETS_PER_MESSAGE`.
const SCATTER_INLINE: usize = 8;

impl<B: DatagramBuffer> Message<B> {
    pub fn new(sender: crate::wire::Host, req_id: RequestId) -> Self {
        Message { chain: Vec::new(), sender, req_id }
    }

    pub fn push(&mut self, buffer: B) {
        self.chain.push(buffer);
    }

    /// Builds the application-visible scatter view: each packet's body,
    /// in order, with the header stripped off.
    pub fn scatter(&self) -> SmallVec<[&[u8]; SCATTER_INLINE]> {
        self.chain.iter().map(|b| b.body()).collect()
    }

    /// Concatenates the scatter view into a single owned buffer. Tests use
    /// this to check the round-trip law; hot paths should prefer `scatter`.
    pub fn concat(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.chain.iter().map(|b| b.body().len()).sum());
        for b in &self.chain {
            out.extend_from_slice(b.body());
        }
        out
    }

    pub fn packet_count(&self) -> usize {
        self.chain.len()
    }

    /// Releases every buffer in the chain back to `pool`.
    pub fn release<P>(self, pool: &mut P)
    where
        P: BufferPool<Buffer = B>,
    {
        for buf in self.chain {
            pool.free_buffer(buf);
        }
    }
}

/// Walks a scatter-gather input, handing out runs of up to `n` bytes that
/// may span multiple input slices.
struct IovCursor<'a> {
    iov: &'a [&'a [u8]],
    slice: usize,
    offset: usize,
}

impl<'a> IovCursor<'a> {
    fn new(iov: &'a [&'a [u8]]) -> Self {
        IovCursor { iov, slice: 0, offset: 0 }
    }

    fn fill(&mut self, out: &mut [u8]) -> usize {
        let mut written = 0;
        while written < out.len() && self.slice < self.iov.len() {
            let current = self.iov[self.slice];
            let available = current.len() - self.offset;
            if available == 0 {
                self.slice += 1;
                self.offset = 0;
                continue;
            }
            let take = available.min(out.len() - written);
            out[written..written + take]
                .copy_from_slice(&current[self.offset..self.offset + take]);
            self.offset += take;
            written += take;
            if self.offset == current.len() {
                self.slice += 1;
                self.offset = 0;
            }
        }
        written
    }
}

fn packet_count_for(total: usize, single_packet: bool) -> usize {
    if total == 0 {
        return 1;
    }
    if single_packet {
        return 1;
    }
    let after_first = total - MIN_PAYLOAD_SIZE.min(total);
    1 + after_first.div_ceil(PAYLOAD_SIZE)
}

/// Segments `iov` into a chain of wire-ready packets per the framing rules:
/// a single-packet message when the total fits in one `PAYLOAD_SIZE` body,
/// otherwise a first packet capped at `MIN_PAYLOAD_SIZE` followed by
/// `PAYLOAD_SIZE`-sized packets. The first packet's `p_order` is rewritten
/// to the total packet count after framing; every other packet keeps its
/// ordinal.
pub fn prepare_message<P: BufferPool>(
    pool: &mut P,
    iov: &[&[u8]],
    msg_type: MessageType,
    policy: RoutingPolicy,
    rid: RequestId,
) -> Result<Vec<P::Buffer>, R2p2Error> {
    let total: usize = iov.iter().map(|s| s.len()).sum();
    let single_packet = total <= PAYLOAD_SIZE;
    let count = packet_count_for(total, single_packet);
    if count > MAX_PACKETS_PER_MESSAGE {
        return Err(R2p2Error::TooManyPackets(count, MAX_PACKETS_PER_MESSAGE));
    }

    let mut chain = Vec::with_capacity(count);
    let mut cursor = IovCursor::new(iov);
    let mut remaining = total;

    for i in 0..count {
        let cap = if i == 0 {
            if single_packet { PAYLOAD_SIZE } else { MIN_PAYLOAD_SIZE }
        } else {
            PAYLOAD_SIZE
        };
        let take = cap.min(remaining);

        let mut buf = match pool.get_buffer() {
            Some(buf) => buf,
            None => {
                for buf in chain {
                    pool.free_buffer(buf);
                }
                return Err(R2p2Error::PoolExhausted("buffer", 0));
            }
        };
        let mut header = Header::new(msg_type, policy, rid);
        header.p_order = i as u16;
        let encoded = header.encode();
        let bytes = buf.bytes_mut();
        bytes[..HEADER_SIZE as usize].copy_from_slice(&encoded);
        let written = cursor.fill(&mut bytes[HEADER_SIZE as usize..HEADER_SIZE as usize + take]);
        debug_assert_eq!(written, take);
        buf.set_len(HEADER_SIZE as usize + take);
        remaining -= take;
        chain.push(buf);
    }

    // Rewrite the first packet's p_order to the total count and fix up flags.
    {
        let first = &mut chain[0];
        let mut header = first.header().expect("just-written header must decode");
        header.p_order = count as u16;
        header.flags.insert(Flags::FIRST);
        if count == 1 {
            header.flags.insert(Flags::LAST);
        }
        first.bytes_mut()[..HEADER_SIZE as usize].copy_from_slice(&header.encode());
    }
    if count > 1 {
        let last = chain.last_mut().expect("count > 1 implies at least one packet");
        let mut header = last.header().expect("just-written header must decode");
        header.flags.insert(Flags::LAST);
        last.bytes_mut()[..HEADER_SIZE as usize].copy_from_slice(&header.encode());
    }

    Ok(chain)
}

/// Builds the single-packet ACK message sent after a multi-packet
/// request's first packet, authorizing the client to send the rest.
pub fn prepare_ack<P: BufferPool>(pool: &mut P, rid: RequestId) -> Result<P::Buffer, R2p2Error> {
    let mut buf = pool.get_buffer().ok_or(R2p2Error::PoolExhausted("buffer", 0))?;
    let mut header = Header::new(MessageType::Ack, RoutingPolicy::FixedRoute, rid);
    header.flags.insert(Flags::FIRST);
    header.flags.insert(Flags::LAST);
    header.p_order = 1;
    let bytes = buf.bytes_mut();
    bytes[..HEADER_SIZE as usize].copy_from_slice(&header.encode());
    bytes[HEADER_SIZE as usize..HEADER_SIZE as usize + ACK_BODY.len()].copy_from_slice(ACK_BODY);
    buf.set_len(HEADER_SIZE as usize + ACK_BODY.len());
    Ok(buf)
}

pub fn is_ack_body(body: &[u8]) -> bool {
    body == ACK_BODY
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::DatagramBuffer;

    /// A heap-backed buffer used by tests and as a reference `BufferPool`
    /// impl; production users supply their own (NIC ring, mempool, etc).
    #[derive(Debug, Clone)]
    pub struct HeapBuffer {
        storage: Vec<u8>,
        len: usize,
    }

    pub const CAPACITY: usize = crate::wire::HEADER_SIZE as usize + crate::wire::PAYLOAD_SIZE;

    impl HeapBuffer {
        pub fn new() -> Self {
            HeapBuffer { storage: vec![0u8; CAPACITY], len: 0 }
        }
    }

    impl DatagramBuffer for HeapBuffer {
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
    pub struct HeapPool {
        pub allocated: usize,
    }

    impl super::BufferPool for HeapPool {
        type Buffer = HeapBuffer;

        fn get_buffer(&mut self) -> Option<Self::Buffer> {
            self.allocated += 1;
            Some(HeapBuffer::new())
        }

        fn free_buffer(&mut self, _buffer: Self::Buffer) {
            self.allocated -= 1;
        }
    }
}
