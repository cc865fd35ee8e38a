//! Events consumed by the router's control thread.
//!
//! All listener accept threads, client reader threads, core reader threads,
//! and the signal listener communicate with the router exclusively through
//! these events, so every piece of registry state is touched by exactly one
//! thread.

use std::net::TcpStream;

use graphgate_host::CoreEvent;
use graphgate_protocol::ClientId;

/// Wire protocol a listener accepted the client on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionKind {
    /// Raw newline-delimited command protocol.
    Raw,
    /// One command per HTTP request.
    Http,
}

/// One unit of work for the router thread.
#[derive(Debug)]
pub(crate) enum Event {
    /// A listener accepted a new client connection.
    Accepted {
        stream: TcpStream,
        kind: SessionKind,
    },
    /// One complete line arrived from a client.
    ClientLine { id: ClientId, line: String },
    /// An HTTP client sent a request no command could be extracted from.
    BadHttpRequest { id: ClientId, reason: String },
    /// A client hung up or its socket failed.
    ClientGone { id: ClientId },
    /// Output or exit from a core process.
    Core(CoreEvent),
    /// Terminate all cores and stop the router.
    Shutdown,
}
