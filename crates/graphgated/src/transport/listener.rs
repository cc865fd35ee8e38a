//! Listener implementation for the gateway's TCP endpoints.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use super::{ConnectionIntake, LISTENER_TARGET};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Errors surfaced while binding or running a socket listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Binding the TCP listener failed.
    #[error("failed to bind listener on port {port}: {source}")]
    Bind {
        /// Requested port.
        port: u16,
        #[source]
        source: io::Error,
    },
    /// The listener socket could not be queried or configured.
    #[error("failed to configure listener: {source}")]
    Configure {
        #[source]
        source: io::Error,
    },
    /// The accept thread panicked.
    #[error("listener thread panicked")]
    ThreadPanic,
}

/// Listener bound to one TCP endpoint.
#[derive(Debug)]
pub struct SocketListener {
    label: &'static str,
    listener: TcpListener,
    addr: SocketAddr,
}

impl SocketListener {
    /// Binds a listener on the given port on all interfaces. Port `0`
    /// requests an ephemeral port, which tests use.
    pub fn bind(label: &'static str, port: u16) -> Result<Self, ListenerError> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .map_err(|source| ListenerError::Bind { port, source })?;
        let addr = listener
            .local_addr()
            .map_err(|source| ListenerError::Configure { source })?;
        Ok(Self {
            label,
            listener,
            addr,
        })
    }

    /// The address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Starts the accept loop on a background thread.
    pub fn start(self, intake: Arc<dyn ConnectionIntake>) -> Result<ListenerHandle, ListenerError> {
        self.listener
            .set_nonblocking(true)
            .map_err(|source| ListenerError::Configure { source })?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name(format!("{}-accept", self.label))
            .spawn(move || run_accept_loop(&self, &shutdown_flag, intake))
            .map_err(|source| ListenerError::Configure { source })?;
        Ok(ListenerHandle {
            shutdown,
            handle: Some(handle),
        })
    }
}

/// Handle to a background accept thread.
pub struct ListenerHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ListenerHandle {
    /// Requests the accept loop to stop after its current iteration.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Waits for the accept thread to finish.
    pub fn join(mut self) -> Result<(), ListenerError> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| ListenerError::ThreadPanic),
            None => Ok(()),
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

fn run_accept_loop(
    listener: &SocketListener,
    shutdown: &AtomicBool,
    intake: Arc<dyn ConnectionIntake>,
) {
    info!(
        target: LISTENER_TARGET,
        endpoint = listener.label,
        addr = %listener.addr,
        "listener active"
    );
    let mut last_error = None::<io::ErrorKind>;
    while !shutdown.load(Ordering::SeqCst) {
        match listener.listener.accept() {
            Ok((stream, peer)) => {
                last_error = None;
                if let Err(error) = stream.set_nonblocking(false) {
                    warn!(
                        target: LISTENER_TARGET,
                        endpoint = listener.label,
                        %peer,
                        %error,
                        "failed to configure accepted socket"
                    );
                    continue;
                }
                intake.accept(stream);
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_BACKOFF);
            }
            Err(error) => {
                let kind = error.kind();
                if last_error != Some(kind) {
                    warn!(
                        target: LISTENER_TARGET,
                        endpoint = listener.label,
                        %error,
                        "socket accept error"
                    );
                }
                last_error = Some(kind);
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }
}
