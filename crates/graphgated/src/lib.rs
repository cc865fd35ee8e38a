//! graphgated is a gateway daemon for graph core processes.
//!
//! Clients connect over a raw newline-delimited TCP protocol or over HTTP
//! and issue commands. Commands the gateway knows (instance management,
//! authorization, introspection) are handled locally; everything else is
//! forwarded to the graph core process the session is bound to. Each core
//! speaks the same line protocol over its stdio pipes and services one
//! command at a time from a per-core FIFO queue, which keeps every reply
//! attributable to the client that asked.
//!
//! The crate exposes just enough surface to embed the daemon in tests:
//! [`start`] brings the gateway up on configured ports and returns a
//! [`GatewayHandle`]; [`run`] additionally blocks until a termination
//! signal arrives.

mod auth;
mod bootstrap;
mod dispatch;
mod router;
mod session;
mod telemetry;
mod transport;

pub use bootstrap::{BootstrapError, GatewayHandle, run, start};
pub use telemetry::TelemetryError;
