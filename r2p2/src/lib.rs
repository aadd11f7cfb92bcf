//! # r2p2
//!
//! A request/response RPC transport over unreliable datagrams.
//!
//! r2p2 frames application payloads into a chain of fixed-size packets
//! behind an 8-byte header, matches replies to requests by a 16-bit id, and
//! hands multi-packet sends through a one-round ACK burst so a slow or
//! congested path never has to buffer a whole message before it knows the
//! peer is listening. It does not retransmit or control congestion itself —
//! those are the surrounding transport's job; this crate only frames,
//! tracks, and reassembles.
//!
//! ## Architecture
//!
//! - **Per-core engine**: [`Engine`] owns one client pool and one server
//!   pool, each a fixed-capacity, generation-counted slab ([`pool::Pool`]).
//!   Nothing here is `Send`/`Sync` on purpose — a multi-core host runs one
//!   `Engine` per core and routes datagrams to the right one itself.
//! - **Collaborator traits**: the engine never allocates a buffer, opens a
//!   socket, or owns a timer wheel. [`io::IoBackend`], [`message::BufferPool`],
//!   [`io::Router`], and [`io::Timer`] are the seams a host implements.
//! - **Wire framing**: [`wire`] is the header codec; [`message`] builds and
//!   reassembles packet chains on top of it.

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod io;
pub mod message;
pub mod pool;
pub mod server;
pub mod wire;

pub use client::RequestContext;
pub use config::EngineConfig;
pub use engine::{Engine, RecvCallback};
pub use error::R2p2Error;
pub use io::{IoBackend, Router, Timer, Timestamps};
pub use message::{BufferPool, DatagramBuffer, Message};
pub use pool::Handle;
pub use wire::{Header, Host, MessageType, RequestId, RoutingPolicy};
