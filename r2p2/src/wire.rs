//! The 8-byte wire header and the handful of constants that size packets.
//!
//! Mirrors the newtype-per-field convention of the original protocol layer
//! this crate is descended from: each header field gets its own small type
//! instead of a bag of `u8`/`u16` positional arguments.

use std::fmt;
use std::net::Ipv4Addr;

/// Protocol version this crate speaks on the wire.
pub const MAGIC: u8 = 0x72; // 'r'

/// The header is always this many bytes, network byte order.
pub const HEADER_SIZE: u8 = 8;

/// Maximum body bytes in a normal (non-first) packet.
pub const PAYLOAD_SIZE: usize = 1024;

/// Maximum body bytes in the first packet of a multi-packet message.
///
/// Deliberately small so the first packet fits inside any routing
/// fast-path that must inspect it before the rest of the message arrives.
pub const MIN_PAYLOAD_SIZE: usize = 64;

/// Hard bound on packets per message; the scratch iovec array used to hand
/// a scatter view to application callbacks cannot exceed this.
pub const MAX_PACKETS_PER_MESSAGE: usize = 255;

/// The body of an ACK packet is always these three bytes.
pub const ACK_BODY: &[u8; 3] = b"ACK";

/// High nibble of the `type_policy` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Request = 0,
    Response = 1,
    Ack = 2,
}

impl MessageType {
    fn from_nibble(n: u8) -> Option<Self> {
        match n {
            0 => Some(MessageType::Request),
            1 => Some(MessageType::Response),
            2 => Some(MessageType::Ack),
            _ => None,
        }
    }
}

/// Low nibble of the `type_policy` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RoutingPolicy {
    FixedRoute = 0,
}

impl RoutingPolicy {
    fn from_nibble(n: u8) -> Option<Self> {
        match n {
            0 => Some(RoutingPolicy::FixedRoute),
            _ => None,
        }
    }
}

/// `FIRST` marks the first packet of a message, `LAST` the last. A
/// single-packet message sets both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(u8);

impl Flags {
    pub const FIRST: Flags = Flags(0b0000_0001);
    pub const LAST: Flags = Flags(0b0000_0010);

    pub const fn empty() -> Self {
        Flags(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn from_bits_truncate(bits: u8) -> Self {
        Flags(bits & (Self::FIRST.0 | Self::LAST.0))
    }

    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

/// A peer endpoint identity: IPv4 address plus UDP-style port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Host {
    pub ip: u32,
    pub port: u16,
}

impl Host {
    pub const fn new(ip: u32, port: u16) -> Self {
        Host { ip, port }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", Ipv4Addr::from(self.ip), self.port)
    }
}

/// A 16-bit request id, unique within a `(sender-ip, sender-port)` scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u16);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// The decoded 8-byte wire header.
///
/// `p_order` keeps its dual meaning from the wire exactly as specified: in
/// the first packet of a message it is the total packet count, in every
/// other packet it is that packet's 0-based ordinal. [`Header::packet_count`]
/// and [`Header::ordinal`] are the decoded, disambiguated accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u8,
    pub header_size: u8,
    pub msg_type: MessageType,
    pub policy: RoutingPolicy,
    pub flags: Flags,
    pub rid: RequestId,
    pub p_order: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("datagram shorter than the {0}-byte header")]
    Undersized(u8),
    #[error("unrecognized magic byte {0:#04x}")]
    BadMagic(u8),
    #[error("header_size field was {0}, expected {expected}", expected = HEADER_SIZE)]
    BadHeaderSize(u8),
    #[error("unrecognized message type nibble {0:#03x}")]
    BadMessageType(u8),
    #[error("unrecognized routing policy nibble {0:#03x}")]
    BadPolicy(u8),
}

impl Header {
    pub fn new(msg_type: MessageType, policy: RoutingPolicy, rid: RequestId) -> Self {
        Header {
            magic: MAGIC,
            header_size: HEADER_SIZE,
            msg_type,
            policy,
            flags: Flags::empty(),
            rid,
            p_order: 0,
        }
    }

    pub fn is_first(&self) -> bool {
        self.flags.contains(Flags::FIRST)
    }

    pub fn is_last(&self) -> bool {
        self.flags.contains(Flags::LAST)
    }

    /// Valid only on a first packet: the total number of packets in the message.
    pub fn packet_count(&self) -> u16 {
        self.p_order
    }

    /// Valid only on a non-first packet: this packet's 0-based ordinal.
    pub fn ordinal(&self) -> u16 {
        self.p_order
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE as usize] {
        let type_policy = ((self.msg_type as u8) << 4) | (self.policy as u8 & 0xF);
        let mut out = [0u8; HEADER_SIZE as usize];
        out[0] = self.magic;
        out[1] = self.header_size;
        out[2] = type_policy;
        out[3] = self.flags.bits();
        out[4..6].copy_from_slice(&self.rid.0.to_be_bytes());
        out[6..8].copy_from_slice(&self.p_order.to_be_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, HeaderError> {
        if buf.len() < HEADER_SIZE as usize {
            return Err(HeaderError::Undersized(HEADER_SIZE));
        }
        let magic = buf[0];
        if magic != MAGIC {
            return Err(HeaderError::BadMagic(magic));
        }
        let header_size = buf[1];
        if header_size != HEADER_SIZE {
            return Err(HeaderError::BadHeaderSize(header_size));
        }
        let type_policy = buf[2];
        let msg_type = MessageType::from_nibble(type_policy >> 4)
            .ok_or(HeaderError::BadMessageType(type_policy >> 4))?;
        let policy = RoutingPolicy::from_nibble(type_policy & 0xF)
            .ok_or(HeaderError::BadPolicy(type_policy & 0xF))?;
        let flags = Flags::from_bits_truncate(buf[3]);
        let rid = RequestId(u16::from_be_bytes([buf[4], buf[5]]));
        let p_order = u16::from_be_bytes([buf[6], buf[7]]);
        Ok(Header {
            magic,
            header_size,
            msg_type,
            policy,
            flags,
            rid,
            p_order,
        })
    }
}
