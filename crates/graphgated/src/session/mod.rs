//! Per-client session state and protocol rendering.
//!
//! A [`Session`] is the gateway-side state for one connected client,
//! independent of the wire protocol it connected over. The protocol
//! difference is confined to a [`Renderer`]: the router only ever forwards
//! status lines and dataset lines through the uniform session surface and
//! reacts to write failures by disconnecting the client.

mod http;
mod raw;

pub(crate) use self::http::{HttpRenderer, command_line_from_request, write_plain_response};
pub(crate) use self::raw::RawRenderer;

use std::io::{self, BufRead, BufReader, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};

use graphgate_protocol::{AccessLevel, ClientId, CoreId};

use crate::router::Event;

pub(crate) const SESSION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::session");

/// Write side of a client connection.
///
/// Abstracted from [`TcpStream`] so session behaviour is testable against
/// in-memory sinks.
pub(crate) trait ClientLink: Write + Send {
    /// Closes the connection. Idempotent.
    fn close(&mut self);
}

impl ClientLink for TcpStream {
    fn close(&mut self) {
        let _ = self.shutdown(Shutdown::Both);
    }
}

/// Renders forwarded lines in the client's wire protocol.
pub(crate) trait Renderer: Send {
    /// Forwards one status line.
    fn forward_statusline(&mut self, link: &mut dyn Write, line: &str) -> io::Result<()>;

    /// Forwards one dataset line (including the terminating blank line).
    fn forward_dataset(&mut self, link: &mut dyn Write, line: &str) -> io::Result<()>;

    /// True once no further output is expected and the connection should be
    /// closed after the current response. Raw sessions never finish this
    /// way; they stay open until the client hangs up.
    fn conversation_finished(&self) -> bool {
        false
    }
}

/// Gateway-side state for one connected client.
pub(crate) struct Session {
    id: ClientId,
    /// Access level granted to this session; starts at read.
    pub access: AccessLevel,
    /// Core this session is bound to via `use-graph`.
    pub core: Option<CoreId>,
    /// True while the client is supplying dataset lines for a queued core
    /// command.
    pub assembling: bool,
    link: Box<dyn ClientLink>,
    renderer: Box<dyn Renderer>,
}

impl Session {
    pub fn new(id: ClientId, link: Box<dyn ClientLink>, renderer: Box<dyn Renderer>) -> Self {
        Self {
            id,
            access: AccessLevel::Read,
            core: None,
            assembling: false,
            link,
            renderer,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Forwards a status line through the protocol renderer.
    pub fn forward_statusline(&mut self, line: &str) -> io::Result<()> {
        self.renderer.forward_statusline(self.link.as_mut(), line)
    }

    /// Forwards a dataset line through the protocol renderer.
    pub fn forward_dataset(&mut self, line: &str) -> io::Result<()> {
        self.renderer.forward_dataset(self.link.as_mut(), line)
    }

    /// True once the current response completes the client's conversation.
    pub fn conversation_finished(&self) -> bool {
        self.renderer.conversation_finished()
    }

    /// Direct access to the connection, bypassing the renderer. Used for
    /// responses to requests that never produced a command line.
    pub fn link_mut(&mut self) -> &mut dyn Write {
        self.link.as_mut()
    }

    /// Closes the client connection.
    pub fn close(&mut self) {
        self.link.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("access", &self.access)
            .field("core", &self.core)
            .field("assembling", &self.assembling)
            .finish()
    }
}

/// Spawns the reader thread for a raw-protocol client.
///
/// Every newline-terminated line becomes a [`Event::ClientLine`]; EOF or a
/// read error becomes [`Event::ClientGone`].
pub(crate) fn spawn_raw_reader(
    id: ClientId,
    stream: TcpStream,
    events: Sender<Event>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("{id}-reader"))
        .spawn(move || {
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        let content = line.trim_end_matches(['\r', '\n']).to_string();
                        if events.send(Event::ClientLine { id, line: content }).is_err() {
                            return;
                        }
                    }
                    Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
            let _ = events.send(Event::ClientGone { id });
        })
}

/// Spawns the reader thread for an HTTP client.
///
/// The request head is parsed into exactly one command line (or a request
/// error); the thread then drains the socket until EOF so the router learns
/// when the client hangs up.
pub(crate) fn spawn_http_reader(
    id: ClientId,
    stream: TcpStream,
    events: Sender<Event>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("{id}-reader"))
        .spawn(move || {
            let mut reader = BufReader::new(stream);
            let mut request_line = String::new();
            match reader.read_line(&mut request_line) {
                Ok(0) | Err(_) => {
                    let _ = events.send(Event::ClientGone { id });
                    return;
                }
                Ok(_) => {}
            }
            let event = match command_line_from_request(request_line.trim_end_matches(['\r', '\n']))
            {
                Ok(line) => Event::ClientLine { id, line },
                Err(error) => Event::BadHttpRequest {
                    id,
                    reason: error.to_string(),
                },
            };
            if events.send(event).is_err() {
                return;
            }
            // Drain remaining header lines and wait for the peer to close.
            let mut sink = String::new();
            loop {
                sink.clear();
                match reader.read_line(&mut sink) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            let _ = events.send(Event::ClientGone { id });
        })
}
