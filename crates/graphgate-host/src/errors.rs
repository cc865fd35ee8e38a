//! Error types for core process hosting.

use std::io;

use thiserror::Error;

/// Errors raised while spawning a core process.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The configured core binary does not exist.
    #[error("core binary '{binary}' not found")]
    BinaryNotFound {
        /// Path that failed to resolve.
        binary: String,
        #[source]
        source: io::Error,
    },
    /// The process could not be started.
    #[error("failed to start core binary '{binary}': {source}")]
    StartFailed {
        /// Path of the binary that failed to start.
        binary: String,
        #[source]
        source: io::Error,
    },
    /// The spawned process exposed no stdin or stdout pipe.
    #[error("core process exposed no {channel} pipe")]
    MissingPipe {
        /// Which pipe was missing.
        channel: &'static str,
    },
    /// The stdout reader thread could not be started.
    #[error("failed to start core reader thread: {source}")]
    ReaderThread {
        #[source]
        source: io::Error,
    },
    /// The stdin writer thread could not be started.
    #[error("failed to start core writer thread: {source}")]
    WriterThread {
        #[source]
        source: io::Error,
    },
}

/// A write to a core's stdin failed.
///
/// Distinct from client-socket write failures: the router's policy on this
/// error is to presume the core desynchronized, terminate it, and fail every
/// queued and in-flight client with a server-error status.
#[derive(Debug, Error)]
#[error("write to core '{name}' failed: {source}")]
pub struct CoreWriteError {
    /// Name of the graph instance whose stdin failed.
    pub name: String,
    #[source]
    pub source: io::Error,
}
