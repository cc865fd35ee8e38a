//! The gateway's application core: session and core registries plus the
//! event loop that routes every client line and every core reply.
//!
//! All registry state is owned by one control thread. Listener accept
//! threads, client readers, and core pipe threads are pure event sources
//! feeding the router channel; they never touch sessions or cores directly. Within
//! one core, commands are serviced strictly in enqueue order and at most
//! one is in flight, so each reply is attributable to the client recorded
//! at flush time.

mod events;
mod registry;

pub(crate) use self::events::{Event, SessionKind};
pub(crate) use self::registry::{CoreRegistry, CreateCoreError};

use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::mpsc::{Receiver, Sender};
use std::time::Duration;

use tracing::{debug, info, warn};

use graphgate_config::GatewayConfig;
use graphgate_host::{CommandQEntry, CoreEvent, CoreReply};
use graphgate_protocol::{ClientId, CoreId, StatusCode, status_line};

use crate::auth::Authority;
use crate::dispatch::{self, CommandContext, CommandTable};
use crate::session::{
    HttpRenderer, RawRenderer, Renderer, Session, spawn_http_reader, spawn_raw_reader,
    write_plain_response,
};

pub(crate) const ROUTER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::router");

/// Write timeout on client sockets: a stuck peer surfaces as a write error
/// and is disconnected instead of wedging the control thread.
const CLIENT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of queueing one client line for a bound core.
pub(crate) enum QueueOutcome {
    /// The entry was appended to the named core's queue.
    Queued {
        core: CoreId,
    },
    /// The session has no bound core.
    NotBound,
    /// The bound core is no longer registered.
    InstanceGone,
}

/// Appends a client command to its session's bound core.
///
/// A command line carrying the dataset marker opens dataset assembly: the
/// session's subsequent lines extend the entry until a blank line completes
/// it. The caller flushes the core's queue afterwards.
pub(crate) fn queue_core_command(
    registry: &mut CoreRegistry,
    session: &mut Session,
    line: String,
) -> QueueOutcome {
    let Some(core_id) = session.core else {
        return QueueOutcome::NotBound;
    };
    let Some(core) = registry.find_mut(core_id) else {
        return QueueOutcome::InstanceGone;
    };
    let entry = CommandQEntry::new(session.id(), line);
    if !entry.flushable() {
        session.assembling = true;
    }
    core.enqueue(entry);
    QueueOutcome::Queued { core: core_id }
}

/// The router state machine.
pub(crate) struct Gateway {
    sessions: HashMap<ClientId, Session>,
    registry: CoreRegistry,
    table: CommandTable,
    authorities: Vec<Box<dyn Authority>>,
    next_client: u64,
    events: Sender<Event>,
}

impl Gateway {
    pub fn new(
        config: &GatewayConfig,
        authorities: Vec<Box<dyn Authority>>,
        events: Sender<Event>,
    ) -> Self {
        Self {
            sessions: HashMap::new(),
            registry: CoreRegistry::new(
                config.core_binary.as_std_path().to_path_buf(),
                events.clone(),
            ),
            table: dispatch::command_table(),
            authorities,
            next_client: 1,
            events,
        }
    }

    /// Runs the event loop until a shutdown event arrives or every sender
    /// is gone, then tears everything down.
    pub fn run(&mut self, events: Receiver<Event>) {
        info!(target: ROUTER_TARGET, "router active");
        while let Ok(event) = events.recv() {
            if matches!(event, Event::Shutdown) {
                break;
            }
            self.handle_event(event);
        }
        self.shutdown_all();
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Accepted { stream, kind } => self.handle_accept(stream, kind),
            Event::ClientLine { id, line } => self.handle_client_line(id, line),
            Event::BadHttpRequest { id, reason } => self.handle_bad_http(id, reason),
            Event::ClientGone { id } => self.handle_client_gone(id),
            Event::Core(CoreEvent::Line { core, line }) => self.handle_core_line(core, line),
            Event::Core(CoreEvent::Exited { core }) => self.handle_core_exited(core),
            Event::Core(CoreEvent::WriteFailed { core }) => self.handle_core_write_failed(core),
            Event::Shutdown => {}
        }
    }

    fn handle_accept(&mut self, stream: TcpStream, kind: SessionKind) {
        let id = ClientId(self.next_client);
        self.next_client += 1;

        if let Err(error) = stream.set_write_timeout(Some(CLIENT_WRITE_TIMEOUT)) {
            warn!(target: ROUTER_TARGET, client = %id, %error, "failed to configure client socket");
            return;
        }
        let reader_stream = match stream.try_clone() {
            Ok(clone) => clone,
            Err(error) => {
                warn!(target: ROUTER_TARGET, client = %id, %error, "failed to clone client socket");
                return;
            }
        };
        let spawned = match kind {
            SessionKind::Raw => spawn_raw_reader(id, reader_stream, self.events.clone()),
            SessionKind::Http => spawn_http_reader(id, reader_stream, self.events.clone()),
        };
        if let Err(error) = spawned {
            warn!(target: ROUTER_TARGET, client = %id, %error, "failed to start client reader");
            return;
        }

        let renderer: Box<dyn Renderer> = match kind {
            SessionKind::Raw => Box::new(RawRenderer),
            SessionKind::Http => Box::new(HttpRenderer::default()),
        };
        debug!(target: ROUTER_TARGET, client = %id, ?kind, "client connected");
        self.sessions
            .insert(id, Session::new(id, Box::new(stream), renderer));
    }

    fn handle_client_line(&mut self, id: ClientId, line: String) {
        let Some((assembling, bound)) = self
            .sessions
            .get(&id)
            .map(|session| (session.assembling, session.core))
        else {
            return;
        };

        if assembling {
            self.continue_dataset(id, bound, line);
            return;
        }

        let Some(first) = line.split_whitespace().next() else {
            return;
        };
        if self.table.contains(first) {
            self.dispatch_local(id, &line);
        } else if bound.is_some() {
            self.send_core_command(id, line);
        } else {
            self.respond_statusline(
                id,
                &status_line(StatusCode::Failure, "no such server command."),
            );
            self.finish_exchange(id);
        }
    }

    /// Extends the dataset of the client's pending core command.
    fn continue_dataset(&mut self, id: ClientId, bound: Option<CoreId>, line: String) {
        let core_id = match bound.and_then(|core_id| {
            self.registry
                .find_mut(core_id)
                .map(|core| (core_id, core.extend_dataset(id, line)))
        }) {
            Some((core_id, true)) => {
                self.set_assembling(id, false);
                core_id
            }
            Some((_, false)) => return,
            None => {
                // The core vanished mid-assembly; drop the remainder.
                self.set_assembling(id, false);
                return;
            }
        };
        self.pump_core(core_id);
    }

    fn set_assembling(&mut self, id: ClientId, assembling: bool) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.assembling = assembling;
        }
    }

    fn dispatch_local(&mut self, id: ClientId, line: &str) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        let mut ctx = CommandContext {
            session,
            registry: &mut self.registry,
            authorities: &self.authorities,
            table: &self.table,
            dropped_core: None,
        };
        let result = dispatch::execute(&mut ctx, line);
        let dropped = ctx.dropped_core;

        if let Err(error) = result {
            warn!(target: ROUTER_TARGET, client = %id, %error, "client write failed");
            self.force_client_disconnect(id);
        }
        if let Some(core_id) = dropped {
            self.teardown_core(core_id, "was dropped.");
        }
        // The command may have queued work for the bound core (help
        // forwarding); give it a chance to flush.
        if let Some(core_id) = self.sessions.get(&id).and_then(|session| session.core) {
            self.pump_core(core_id);
        }
        self.finish_exchange(id);
    }

    fn send_core_command(&mut self, id: ClientId, line: String) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        match queue_core_command(&mut self.registry, session, line) {
            QueueOutcome::Queued { core } => self.pump_core(core),
            QueueOutcome::InstanceGone => {
                self.respond_statusline(
                    id,
                    &status_line(StatusCode::Error, "not connected to a running graph instance."),
                );
                self.finish_exchange(id);
            }
            QueueOutcome::NotBound => {
                self.respond_statusline(
                    id,
                    &status_line(StatusCode::Failure, "no such server command."),
                );
                self.finish_exchange(id);
            }
        }
    }

    fn handle_bad_http(&mut self, id: ClientId, reason: String) {
        warn!(target: ROUTER_TARGET, client = %id, reason, "rejecting HTTP request");
        if let Some(session) = self.sessions.get_mut(&id) {
            let _ = write_plain_response(session.link_mut(), 400, "Bad Request", &reason);
        }
        self.shutdown_client(id);
    }

    fn handle_core_line(&mut self, core_id: CoreId, line: String) {
        // Output from an already-removed core's reader is dropped here.
        let Some(core) = self.registry.find_mut(core_id) else {
            return;
        };
        match core.line_from_core(&line) {
            CoreReply::Statusline {
                client,
                dataset_follows,
            } => {
                self.deliver(client, &line, true);
                if !dataset_follows {
                    self.pump_core(core_id);
                    if let Some(client) = client {
                        self.finish_exchange(client);
                    }
                }
            }
            CoreReply::Dataset { client, finished } => {
                self.deliver(client, &line, false);
                if finished {
                    self.pump_core(core_id);
                    if let Some(client) = client {
                        self.finish_exchange(client);
                    }
                }
            }
            CoreReply::Unsolicited => {}
        }
    }

    fn handle_core_exited(&mut self, core_id: CoreId) {
        let Some(core) = self.registry.find_mut(core_id) else {
            return;
        };
        let status = core.reap();
        info!(
            target: ROUTER_TARGET,
            core = %core_id,
            graph = core.name(),
            ?status,
            "core exited"
        );
        self.teardown_core(core_id, "terminated.");
    }

    /// The core's writer thread reported a failed stdin write; the process
    /// stopped reading and cannot be trusted to stay in sync.
    fn handle_core_write_failed(&mut self, core_id: CoreId) {
        warn!(target: ROUTER_TARGET, core = %core_id, "core stopped accepting input");
        self.teardown_core(core_id, "terminated after a write failure.");
    }

    /// Removes a core and resolves everyone still waiting on it.
    ///
    /// Every queued and in-flight client receives a server-error status so
    /// nobody is left hanging on a reply that will never come; sessions
    /// bound to the core are unbound so they can `use-graph` elsewhere.
    fn teardown_core(&mut self, core_id: CoreId, reason: &str) {
        let Some(mut core) = self.registry.remove(core_id) else {
            return;
        };
        let name = core.name().to_string();
        let owners = core.fail_pending();
        core.shutdown();
        info!(
            target: ROUTER_TARGET,
            core = %core_id,
            graph = %name,
            failed_clients = owners.len(),
            "core removed"
        );

        let message = status_line(
            StatusCode::Error,
            &format!("graph instance '{name}' {reason}"),
        );
        for owner in owners {
            self.respond_statusline(owner, &message);
            self.finish_exchange(owner);
        }

        let bound: Vec<ClientId> = self
            .sessions
            .values()
            .filter(|session| session.core == Some(core_id))
            .map(Session::id)
            .collect();
        for id in bound {
            if let Some(session) = self.sessions.get_mut(&id) {
                session.core = None;
                session.assembling = false;
            }
        }
    }

    /// Flushes a core's queue; a write failure condemns the core.
    fn pump_core(&mut self, core_id: CoreId) {
        let result = match self.registry.find_mut(core_id) {
            Some(core) => core.flush_command_queue(),
            None => return,
        };
        if let Err(error) = result {
            warn!(target: ROUTER_TARGET, core = %core_id, %error, "core write failed");
            self.teardown_core(core_id, "terminated after a write failure.");
        }
    }

    fn pump_all(&mut self) {
        for core_id in self.registry.ids() {
            self.pump_core(core_id);
        }
    }

    /// Forwards one reply line to the client that owns the in-flight
    /// command. Replies for departed clients are discarded silently.
    fn deliver(&mut self, client: Option<ClientId>, line: &str, is_status: bool) {
        let Some(id) = client else {
            return;
        };
        let Some(session) = self.sessions.get_mut(&id) else {
            debug!(target: ROUTER_TARGET, client = %id, "discarding reply for departed client");
            return;
        };
        let result = if is_status {
            session.forward_statusline(line)
        } else {
            session.forward_dataset(line)
        };
        if let Err(error) = result {
            warn!(target: ROUTER_TARGET, client = %id, %error, "client write failed");
            self.force_client_disconnect(id);
        }
    }

    fn respond_statusline(&mut self, id: ClientId, line: &str) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        let result = session.forward_statusline(line);
        if let Err(error) = result {
            warn!(target: ROUTER_TARGET, client = %id, %error, "client write failed");
            self.force_client_disconnect(id);
        }
    }

    /// Closes the session once its conversation is over and no core owes it
    /// output. Raw sessions never finish this way; HTTP sessions close
    /// after the response completes.
    fn finish_exchange(&mut self, id: ClientId) {
        let finished = match self.sessions.get(&id) {
            Some(session) => session.conversation_finished(),
            None => return,
        };
        if finished && !self.registry.any_owes(id) {
            self.shutdown_client(id);
        }
    }

    fn handle_client_gone(&mut self, id: ClientId) {
        if let Some(mut session) = self.sessions.remove(&id) {
            session.close();
            debug!(target: ROUTER_TARGET, client = %id, "client disconnected");
        }
        self.registry.purge_client(id);
        self.pump_all();
    }

    /// Error-path teardown after a write failure on the client socket.
    fn force_client_disconnect(&mut self, id: ClientId) {
        if let Some(mut session) = self.sessions.remove(&id) {
            session.close();
            warn!(target: ROUTER_TARGET, client = %id, "client forcibly disconnected");
        }
        self.registry.purge_client(id);
        self.pump_all();
    }

    /// Graceful teardown once a conversation is known finished.
    fn shutdown_client(&mut self, id: ClientId) {
        if let Some(mut session) = self.sessions.remove(&id) {
            session.close();
            debug!(target: ROUTER_TARGET, client = %id, "conversation finished, closing");
        }
        self.registry.purge_client(id);
        self.pump_all();
    }

    fn shutdown_all(&mut self) {
        info!(
            target: ROUTER_TARGET,
            cores = self.registry.len(),
            clients = self.sessions.len(),
            "shutting down"
        );
        for core_id in self.registry.ids() {
            if let Some(mut core) = self.registry.remove(core_id) {
                core.fail_pending();
                core.shutdown();
            }
        }
        for (_, mut session) in self.sessions.drain() {
            session.close();
        }
    }
}
