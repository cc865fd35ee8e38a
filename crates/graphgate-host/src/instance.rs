//! Core instance wrapper and reply-attribution state machine.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::{debug, warn};

use graphgate_protocol::{ClientId, CoreId, line_is_blank, line_opens_dataset};

use crate::HOST_TARGET;
use crate::errors::{CoreWriteError, SpawnError};
use crate::queue::CommandQEntry;
use crate::reader::{CoreEvent, spawn_reader};
use crate::writer::spawn_writer;

/// Grace period between SIGTERM and SIGKILL during shutdown.
const TERMINATE_GRACE: Duration = Duration::from_millis(200);

/// Classification of one line read from a core's stdout.
///
/// The embedded client id is a lookup key into the router's session
/// registry, never a reference: the client may have disconnected between
/// dispatch and reply, in which case the router discards the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreReply {
    /// The status line answering the in-flight command.
    Statusline {
        /// Owner of the in-flight command.
        client: Option<ClientId>,
        /// Whether dataset lines follow this status line.
        dataset_follows: bool,
    },
    /// One dataset line following a status line.
    Dataset {
        /// Owner of the in-flight command.
        client: Option<ClientId>,
        /// True for the terminating blank line.
        finished: bool,
    },
    /// Output the gateway never asked for; logged and discarded.
    Unsolicited,
}

/// Write side of a core's stdin.
///
/// Spawned processes get a channel feeding a dedicated writer thread, so
/// handing over a payload never blocks on the pipe. Tests substitute a
/// direct in-memory sink.
enum CoreLink {
    Pipe(Sender<Vec<u8>>),
    #[cfg_attr(not(any(test, feature = "test-support")), allow(dead_code))]
    Direct(Box<dyn Write + Send>),
}

/// One spawned core process and the queue of commands bound for it.
pub struct CoreInstance {
    id: CoreId,
    name: String,
    pid: u32,
    child: Option<Child>,
    link: CoreLink,
    command_q: VecDeque<CommandQEntry>,
    expecting_reply: bool,
    expecting_dataset: bool,
    last_client: Option<ClientId>,
}

impl CoreInstance {
    /// Spawns the core binary for the named graph and starts its pipe
    /// threads: one draining stdout into events, one feeding stdin from a
    /// channel.
    ///
    /// The graph name is passed as the sole process argument. Stderr is
    /// inherited so core diagnostics land in the daemon's own stderr.
    pub fn spawn<F>(
        id: CoreId,
        name: &str,
        binary: &Path,
        on_event: F,
    ) -> Result<Self, SpawnError>
    where
        F: Fn(CoreEvent) + Send + Sync + 'static,
    {
        debug!(
            target: HOST_TARGET,
            core = %id,
            graph = name,
            binary = %binary.display(),
            "spawning core process"
        );

        let mut child = Command::new(binary)
            .arg(name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| {
                if source.kind() == io::ErrorKind::NotFound {
                    SpawnError::BinaryNotFound {
                        binary: binary.display().to_string(),
                        source,
                    }
                } else {
                    SpawnError::StartFailed {
                        binary: binary.display().to_string(),
                        source,
                    }
                }
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or(SpawnError::MissingPipe { channel: "stdin" })?;
        let stdout = child
            .stdout
            .take()
            .ok_or(SpawnError::MissingPipe { channel: "stdout" })?;

        let on_event = Arc::new(on_event);
        let reader_events = Arc::clone(&on_event);
        spawn_reader(id, stdout, move |event| (*reader_events)(event))
            .map_err(|source| SpawnError::ReaderThread { source })?;
        let writer_events = Arc::clone(&on_event);
        let feed = spawn_writer(id, stdin, move |event| (*writer_events)(event))
            .map_err(|source| SpawnError::WriterThread { source })?;

        let pid = child.id();
        debug!(target: HOST_TARGET, core = %id, graph = name, pid, "core process spawned");

        Ok(Self {
            id,
            name: name.to_string(),
            pid,
            child: Some(child),
            link: CoreLink::Pipe(feed),
            command_q: VecDeque::new(),
            expecting_reply: false,
            expecting_dataset: false,
            last_client: None,
        })
    }

    /// Builds an instance around an arbitrary write sink instead of a real
    /// process. Exists for tests of the queue and state machine.
    #[cfg(any(test, feature = "test-support"))]
    pub fn with_link(id: CoreId, name: &str, writer: Box<dyn Write + Send>) -> Self {
        Self {
            id,
            name: name.to_string(),
            pid: 0,
            child: None,
            link: CoreLink::Direct(writer),
            command_q: VecDeque::new(),
            expecting_reply: false,
            expecting_dataset: false,
            last_client: None,
        }
    }

    /// Registry id of this instance.
    #[must_use]
    pub fn id(&self) -> CoreId {
        self.id
    }

    /// User-chosen graph name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pid of the core process.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Number of commands still queued (not in flight).
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.command_q.len()
    }

    /// True when no command is in flight.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        !self.expecting_reply && !self.expecting_dataset
    }

    /// The client whose command is currently in flight, if any.
    #[must_use]
    pub fn in_flight_client(&self) -> Option<ClientId> {
        if self.is_idle() { None } else { self.last_client }
    }

    /// True when this core still owes output to the given client, either
    /// for the in-flight command or for a queued one.
    #[must_use]
    pub fn owes_client(&self, client: ClientId) -> bool {
        self.in_flight_client() == Some(client)
            || self.command_q.iter().any(|entry| entry.client() == client)
    }

    /// Appends an entry to the command queue. Never blocks and has no
    /// immediate side effect; callers follow up with
    /// [`flush_command_queue`](Self::flush_command_queue).
    pub fn enqueue(&mut self, entry: CommandQEntry) {
        self.command_q.push_back(entry);
    }

    /// Extends the newest incomplete entry owned by `client` with one
    /// dataset line.
    ///
    /// Returns `true` when the entry became flushable (or no longer
    /// exists), `false` while more dataset lines are expected.
    pub fn extend_dataset(&mut self, client: ClientId, line: String) -> bool {
        match self
            .command_q
            .iter_mut()
            .rev()
            .find(|entry| entry.client() == client && !entry.flushable())
        {
            Some(entry) => entry.push_dataset_line(line),
            None => true,
        }
    }

    /// Hands as many queued commands to the core as the protocol allows.
    ///
    /// Progress stops as soon as the queue front is not flushable or a
    /// command goes in flight: no command is written while a reply or
    /// dataset is outstanding, which keeps at most one command in flight
    /// and makes the reply stream attributable. On a transmit failure the
    /// entry is put back so its owner is reported by
    /// [`fail_pending`](Self::fail_pending).
    pub fn flush_command_queue(&mut self) -> Result<(), CoreWriteError> {
        while self.is_idle() && self.command_q.front().is_some_and(CommandQEntry::flushable) {
            let Some(entry) = self.command_q.pop_front() else {
                break;
            };
            if let Err(error) = self.transmit(entry.payload()) {
                self.command_q.push_front(entry);
                return Err(error);
            }
            self.last_client = Some(entry.client());
            self.expecting_reply = true;
            self.expecting_dataset = false;
        }
        Ok(())
    }

    fn transmit(&mut self, payload: Vec<u8>) -> Result<(), CoreWriteError> {
        match &mut self.link {
            CoreLink::Pipe(feed) => feed.send(payload).map_err(|_| CoreWriteError {
                name: self.name.clone(),
                source: io::Error::new(io::ErrorKind::BrokenPipe, "core writer thread gone"),
            }),
            CoreLink::Direct(writer) => writer
                .write_all(&payload)
                .and_then(|()| writer.flush())
                .map_err(|source| CoreWriteError {
                    name: self.name.clone(),
                    source,
                }),
        }
    }

    /// Classifies one line of core output and advances the reply state
    /// machine.
    pub fn line_from_core(&mut self, line: &str) -> CoreReply {
        if self.expecting_reply {
            self.expecting_reply = false;
            let dataset_follows = line_opens_dataset(line);
            self.expecting_dataset = dataset_follows;
            CoreReply::Statusline {
                client: self.last_client,
                dataset_follows,
            }
        } else if self.expecting_dataset {
            let finished = line_is_blank(line);
            if finished {
                self.expecting_dataset = false;
            }
            CoreReply::Dataset {
                client: self.last_client,
                finished,
            }
        } else {
            warn!(
                target: HOST_TARGET,
                core = %self.id,
                graph = %self.name,
                line,
                "unsolicited core output discarded"
            );
            CoreReply::Unsolicited
        }
    }

    /// Drops not-yet-flushed queue entries owned by the given client, used
    /// when that client disconnects. The in-flight command cannot be
    /// recalled; its replies are discarded on arrival instead.
    pub fn purge_client(&mut self, client: ClientId) {
        self.command_q.retain(|entry| entry.client() != client);
    }

    /// Drains all pending work, returning the owners to be failed: the
    /// in-flight client first (if any), then every queued entry's client in
    /// order.
    pub fn fail_pending(&mut self) -> Vec<ClientId> {
        let mut owners = Vec::new();
        if let Some(client) = self.in_flight_client() {
            owners.push(client);
        }
        self.expecting_reply = false;
        self.expecting_dataset = false;
        owners.extend(self.command_q.drain(..).map(|entry| entry.client()));
        owners
    }

    /// Delivers SIGTERM to the core process.
    pub fn signal_terminate(&self) -> Result<(), Errno> {
        if self.child.is_none() {
            return Ok(());
        }
        kill(Pid::from_raw(self.pid as i32), Signal::SIGTERM)
    }

    /// Reaps an exited core process, returning its exit status when
    /// available.
    pub fn reap(&mut self) -> Option<ExitStatus> {
        let mut child = self.child.take()?;
        match child.wait() {
            Ok(status) => Some(status),
            Err(error) => {
                warn!(
                    target: HOST_TARGET,
                    core = %self.id,
                    graph = %self.name,
                    %error,
                    "failed to reap core process"
                );
                None
            }
        }
    }

    /// Terminates the core process: SIGTERM now, SIGKILL from a detached
    /// helper thread after a short grace period. Never sleeps on the
    /// calling thread.
    pub fn shutdown(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        let _ = kill(Pid::from_raw(self.pid as i32), Signal::SIGTERM);
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(target: HOST_TARGET, core = %self.id, ?status, "core exited");
                return;
            }
            Ok(None) | Err(_) => {}
        }
        let id = self.id;
        let spawned = thread::Builder::new()
            .name(format!("{id}-reaper"))
            .spawn(move || {
                thread::sleep(TERMINATE_GRACE);
                match child.try_wait() {
                    Ok(Some(status)) => {
                        debug!(target: HOST_TARGET, core = %id, ?status, "core exited in grace period");
                    }
                    Ok(None) | Err(_) => {
                        let _ = child.kill();
                        let _ = child.wait();
                    }
                }
            });
        if let Err(error) = spawned {
            warn!(
                target: HOST_TARGET,
                core = %self.id,
                graph = %self.name,
                %error,
                "could not start reaper thread; core left to exit on SIGTERM"
            );
        }
    }
}

impl Drop for CoreInstance {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for CoreInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreInstance")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("pid", &self.pid)
            .field("queued", &self.command_q.len())
            .field("expecting_reply", &self.expecting_reply)
            .field("expecting_dataset", &self.expecting_dataset)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Write sink that records everything the instance flushes.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().expect("buffer lock").clone()).expect("utf8")
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("buffer lock").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn instance() -> (CoreInstance, SharedBuf) {
        let buf = SharedBuf::default();
        let core = CoreInstance::with_link(CoreId(1), "wiki", Box::new(buf.clone()));
        (core, buf)
    }

    #[test]
    fn flushes_one_command_at_a_time() {
        let (mut core, buf) = instance();
        core.enqueue(CommandQEntry::new(ClientId(1), "first".into()));
        core.enqueue(CommandQEntry::new(ClientId(2), "second".into()));

        core.flush_command_queue().expect("flush");
        assert_eq!(buf.contents(), "first\n");
        assert!(!core.is_idle());
        assert_eq!(core.in_flight_client(), Some(ClientId(1)));
        assert_eq!(core.queue_len(), 1);
    }

    #[test]
    fn replies_attributed_in_fifo_order() {
        let (mut core, buf) = instance();
        core.enqueue(CommandQEntry::new(ClientId(1), "first".into()));
        core.enqueue(CommandQEntry::new(ClientId(2), "second".into()));
        core.flush_command_queue().expect("flush");

        let reply = core.line_from_core("OK. done.");
        assert_eq!(
            reply,
            CoreReply::Statusline {
                client: Some(ClientId(1)),
                dataset_follows: false,
            }
        );
        assert!(core.is_idle());

        core.flush_command_queue().expect("flush");
        assert_eq!(buf.contents(), "first\nsecond\n");
        let reply = core.line_from_core("OK. done.");
        assert_eq!(
            reply,
            CoreReply::Statusline {
                client: Some(ClientId(2)),
                dataset_follows: false,
            }
        );
    }

    #[test]
    fn dataset_reply_runs_until_blank_line() {
        let (mut core, _buf) = instance();
        core.enqueue(CommandQEntry::new(ClientId(3), "list-successors 5".into()));
        core.flush_command_queue().expect("flush");

        let reply = core.line_from_core("OK. nodes follow:");
        assert_eq!(
            reply,
            CoreReply::Statusline {
                client: Some(ClientId(3)),
                dataset_follows: true,
            }
        );
        assert!(!core.is_idle());

        assert_eq!(
            core.line_from_core("6"),
            CoreReply::Dataset {
                client: Some(ClientId(3)),
                finished: false,
            }
        );
        assert_eq!(
            core.line_from_core(""),
            CoreReply::Dataset {
                client: Some(ClientId(3)),
                finished: true,
            }
        );
        assert!(core.is_idle());
    }

    #[test]
    fn unsolicited_output_is_flagged() {
        let (mut core, _buf) = instance();
        assert_eq!(core.line_from_core("OK. surprise."), CoreReply::Unsolicited);
    }

    #[test]
    fn incomplete_dataset_command_is_not_flushed() {
        let (mut core, buf) = instance();
        core.enqueue(CommandQEntry::new(ClientId(4), "add-arcs:".into()));
        core.flush_command_queue().expect("flush");
        assert_eq!(buf.contents(), "");

        assert!(!core.extend_dataset(ClientId(4), "1,2".into()));
        assert!(core.extend_dataset(ClientId(4), String::new()));
        core.flush_command_queue().expect("flush");
        assert_eq!(buf.contents(), "add-arcs:\n1,2\n\n");
        assert_eq!(core.in_flight_client(), Some(ClientId(4)));
    }

    #[test]
    fn later_commands_wait_behind_incomplete_front() {
        let (mut core, buf) = instance();
        core.enqueue(CommandQEntry::new(ClientId(5), "add-arcs:".into()));
        core.enqueue(CommandQEntry::new(ClientId(6), "stats".into()));
        core.flush_command_queue().expect("flush");
        // FIFO order holds even though the second entry is ready first.
        assert_eq!(buf.contents(), "");
    }

    #[test]
    fn fail_pending_reports_in_flight_then_queued() {
        let (mut core, _buf) = instance();
        core.enqueue(CommandQEntry::new(ClientId(1), "a".into()));
        core.flush_command_queue().expect("flush");
        core.enqueue(CommandQEntry::new(ClientId(2), "b".into()));
        core.enqueue(CommandQEntry::new(ClientId(3), "c".into()));

        let owners = core.fail_pending();
        assert_eq!(owners, vec![ClientId(1), ClientId(2), ClientId(3)]);
        assert!(core.is_idle());
        assert_eq!(core.queue_len(), 0);
    }

    /// Write sink that refuses every write.
    struct BrokenSink;

    impl Write for BrokenSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "core gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_transmit_keeps_the_entry_owner_pending() {
        let mut core = CoreInstance::with_link(CoreId(1), "wiki", Box::new(BrokenSink));
        core.enqueue(CommandQEntry::new(ClientId(9), "stats".into()));

        let error = core.flush_command_queue().expect_err("write should fail");
        assert_eq!(error.name, "wiki");
        assert!(core.is_idle());
        assert_eq!(core.fail_pending(), vec![ClientId(9)]);
    }

    #[test]
    fn owes_client_tracks_queue_and_flight() {
        let (mut core, _buf) = instance();
        core.enqueue(CommandQEntry::new(ClientId(1), "a".into()));
        core.flush_command_queue().expect("flush");
        core.enqueue(CommandQEntry::new(ClientId(2), "b".into()));

        assert!(core.owes_client(ClientId(1)));
        assert!(core.owes_client(ClientId(2)));
        assert!(!core.owes_client(ClientId(3)));
    }
}
