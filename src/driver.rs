// External collaborator contracts the core schedules work through.
//
// The core does not know how bytes reach a socket, how a request is
// authorized, or how a response body is produced — those are private to
// whatever embeds this crate. This module only pins down the interface
// boundary described by the scheduler and channel registry; it is not a
// networking stack.

use crate::scheduler::Conn;
use std::time::Duration;

/// An opaque, driver-owned connection handle. The core never inspects its
/// contents, only moves it between a `Conn` and a channel registry entry.
pub struct Sock {
    pub peer_addr: String,
    pub fd: i32,
}

impl Sock {
    pub fn new(peer_addr: impl Into<String>, fd: i32) -> Self {
        Self {
            peer_addr: peer_addr.into(),
            fd,
        }
    }
}

/// Transport-level send/receive and per-connection lifecycle hooks.
pub trait Driver: Send + Sync {
    fn name(&self) -> &str;

    /// Write bytes to the peer. Driver-specific framing (chunking, TLS
    /// record layer, ...) happens behind this call.
    fn send(&self, sock: &mut Sock, buf: &[u8]) -> std::io::Result<usize>;

    /// Read up to `buf.len()` bytes, blocking at most `timeout`.
    fn recv(&self, sock: &mut Sock, buf: &mut [u8], timeout: Option<Duration>) -> std::io::Result<usize>;

    /// Runs once per accepted socket before any request is read from it
    /// (TLS handshake, SNI inspection, etc). Default is a no-op accept.
    fn client_init(&self, _sock: &mut Sock) -> std::io::Result<()> {
        Ok(())
    }

    /// Driver-private hook invoked before the filter chain runs; returning
    /// `Some(status)` lets the driver short-circuit the request entirely.
    fn request(&self, _conn: &mut Conn) -> Option<u16> {
        None
    }

    /// Invoked once a slot is returned to its pool's free list, after
    /// request-side hooks have all run.
    fn release(&self, _conn: &mut Conn) {}
}

/// Outcome of a filter (pre-auth, post-auth, trace) chain invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    Ok,
    /// Short-circuit: skip the request proc but still run trace filters.
    FilterReturn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Ok,
    Forbidden,
    Unauthorized,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPhase {
    PreAuth,
    PostAuth,
    Trace,
    VoidTrace,
}

/// Request-processing collaborators: filter chain, authorization, and the
/// actual request proc. Supplied separately from `Driver` because these are
/// typically application/framework-owned rather than transport-owned.
pub trait RequestHooks: Send + Sync {
    fn run_filters(&self, _conn: &mut Conn, _phase: FilterPhase) -> FilterOutcome {
        FilterOutcome::Ok
    }

    fn authorize(&self, _conn: &Conn) -> AuthOutcome {
        AuthOutcome::Ok
    }

    fn run_request(&self, _conn: &mut Conn) -> u16 {
        200
    }
}

/// `RequestHooks` that does nothing but return 200, for pools that only
/// need transport-level behavior exercised (tests, warmup probes).
pub struct NullHooks;

impl RequestHooks for NullHooks {}
