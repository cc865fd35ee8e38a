//! Stdin writer thread for core processes.
//!
//! Writes to a core's stdin happen on a dedicated thread fed through a
//! channel. A core that stops reading stalls only its own writer thread;
//! the caller handing over a payload never blocks on the pipe. Dropping the
//! sender ends the thread, which closes the core's stdin and lets it see
//! EOF.

use std::io::{self, Write};
use std::process::ChildStdin;
use std::sync::mpsc::{self, Sender};
use std::thread;

use tracing::warn;

use graphgate_protocol::CoreId;

use crate::HOST_TARGET;
use crate::reader::CoreEvent;

/// Spawns the writer thread for a core's stdin, returning its feed.
///
/// A failed write produces a terminal [`CoreEvent::WriteFailed`] and ends
/// the thread; later sends on the returned channel fail, which callers
/// treat as the same condition.
pub(crate) fn spawn_writer<F>(
    core: CoreId,
    stdin: ChildStdin,
    mut on_event: F,
) -> io::Result<Sender<Vec<u8>>>
where
    F: FnMut(CoreEvent) + Send + 'static,
{
    let (sender, receiver) = mpsc::channel::<Vec<u8>>();
    thread::Builder::new()
        .name(format!("{core}-writer"))
        .spawn(move || {
            let mut stdin = stdin;
            while let Ok(payload) = receiver.recv() {
                if let Err(error) = stdin.write_all(&payload).and_then(|()| stdin.flush()) {
                    warn!(target: HOST_TARGET, %core, %error, "core stdin write failed");
                    on_event(CoreEvent::WriteFailed { core });
                    return;
                }
            }
        })?;
    Ok(sender)
}
