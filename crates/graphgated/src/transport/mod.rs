//! Socket listeners for the gateway's client-facing endpoints.
//!
//! The gateway binds one TCP listener per wire protocol (raw lines and
//! HTTP) and accepts connections on a background thread per listener.
//! Accepted streams are handed to a [`ConnectionIntake`] without any
//! protocol work happening on the accept thread.

mod listener;

pub(crate) use self::listener::{ListenerError, ListenerHandle, SocketListener};

use std::net::TcpStream;

pub(crate) const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");

/// Receives accepted client sockets.
pub(crate) trait ConnectionIntake: Send + Sync + 'static {
    /// Takes ownership of one accepted connection. Implementations should
    /// avoid panicking.
    fn accept(&self, stream: TcpStream);
}
