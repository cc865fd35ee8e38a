//! Worker ("core") process hosting for the graphgate gateway.
//!
//! A [`CoreInstance`] owns one spawned core process: its pid, the write side
//! of its stdin, a FIFO command queue, and the reply-attribution state
//! machine. The gateway talks to each core over a private line protocol:
//! command lines (optionally followed by a dataset terminated by a blank
//! line) go in, exactly one status line per command comes back, optionally
//! followed by a dataset of its own.
//!
//! The invariant everything here exists to protect: at most one command is
//! in flight to a given core at any time. Because the core answers commands
//! strictly in order, this lets every reply line be attributed to the client
//! whose command is outstanding without tagging lines on the wire.
//!
//! Each core gets a thread per pipe: a reader draining stdout into
//! [`CoreEvent`]s delivered through a caller supplied callback, and a writer
//! feeding stdin from a channel so handing over a command never blocks on
//! the pipe. The daemon funnels the events into its router channel.

mod errors;
mod instance;
mod queue;
mod reader;
mod writer;

pub use errors::{CoreWriteError, SpawnError};
pub use instance::{CoreInstance, CoreReply};
pub use queue::CommandQEntry;
pub use reader::CoreEvent;

/// Log target for core host operations.
pub(crate) const HOST_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::host");
