//! Engine configuration: the handful of sizing constants the base spec
//! pins (`POOL_SIZE`, the scratch iovec bound) plus a timeout default, in
//! one place so a host application can tune them without touching engine
//! internals.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default capacity of each per-core object pool (client pairs, server
/// pairs). Allocation beyond this is a resource-exhaustion error, not a
/// silent reallocation — the base spec treats pool exhaustion as a sizing
/// bug the caller must fix.
pub const DEFAULT_POOL_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EngineConfig {
    /// Capacity of the client-pair pool.
    pub client_pool_size: usize,
    /// Capacity of the server-pair pool.
    pub server_pool_size: usize,
    /// Request timeout applied to every outgoing request. `RequestContext`
    /// has no per-request override; a caller that needs a different
    /// timeout for one request runs it on an `Engine` configured for it.
    pub default_timeout: std::time::Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            client_pool_size: DEFAULT_POOL_SIZE,
            server_pool_size: DEFAULT_POOL_SIZE,
            default_timeout: std::time::Duration::from_secs(5),
        }
    }
}
