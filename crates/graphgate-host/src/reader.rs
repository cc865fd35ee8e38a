//! Stdout reader thread for core processes.

use std::io::{self, BufRead, BufReader};
use std::process::ChildStdout;
use std::thread::{self, JoinHandle};

use tracing::debug;

use graphgate_protocol::CoreId;

use crate::HOST_TARGET;

/// Events produced by a core's pipe threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    /// One line of core output, without the trailing newline.
    Line {
        /// Core that produced the line.
        core: CoreId,
        /// The line content.
        line: String,
    },
    /// The core closed its stdout; the process has exited or is about to.
    Exited {
        /// Core whose output ended.
        core: CoreId,
    },
    /// A write to the core's stdin failed; the process stopped reading.
    WriteFailed {
        /// Core whose stdin failed.
        core: CoreId,
    },
}

/// Spawns the reader thread draining a core's stdout into events.
///
/// EOF (or an unrecoverable read error) produces a terminal
/// [`CoreEvent::Exited`], which the router treats as equivalent to an
/// explicit drop of the instance.
pub(crate) fn spawn_reader<F>(
    core: CoreId,
    stdout: ChildStdout,
    mut on_event: F,
) -> io::Result<JoinHandle<()>>
where
    F: FnMut(CoreEvent) + Send + 'static,
{
    thread::Builder::new()
        .name(format!("{core}-reader"))
        .spawn(move || {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        let content = line.trim_end_matches(['\r', '\n']).to_string();
                        on_event(CoreEvent::Line {
                            core,
                            line: content,
                        });
                    }
                    Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                    Err(error) => {
                        debug!(
                            target: HOST_TARGET,
                            %core,
                            %error,
                            "core stdout read failed"
                        );
                        break;
                    }
                }
            }
            on_event(CoreEvent::Exited { core });
        })
}
