//! Daemon bootstrap: telemetry, authorities, listeners, and the router
//! thread.

use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::{info, warn};

use graphgate_config::{ConfigError, GatewayConfig};

use crate::auth::{AUTH_TARGET, Authority, PasswordAuthority};
use crate::router::{Event, Gateway, SessionKind};
use crate::telemetry::{self, TelemetryError};
use crate::transport::{ConnectionIntake, ListenerError, ListenerHandle, SocketListener};

const BOOTSTRAP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::bootstrap");

/// Errors raised while bringing the daemon up.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Listener(#[from] ListenerError),
    /// The router thread could not be spawned.
    #[error("failed to start router thread: {source}")]
    RouterThread {
        #[source]
        source: io::Error,
    },
    /// The shutdown signal handler could not be installed.
    #[error("failed to install signal handler: {source}")]
    Signals {
        #[source]
        source: io::Error,
    },
}

/// Forwards accepted sockets into the router channel.
struct Intake {
    kind: SessionKind,
    events: Sender<Event>,
}

impl ConnectionIntake for Intake {
    fn accept(&self, stream: TcpStream) {
        let _ = self.events.send(Event::Accepted {
            stream,
            kind: self.kind,
        });
    }
}

/// A running gateway.
///
/// Dropping the handle requests shutdown and waits for the router; tests
/// use [`shutdown`](Self::shutdown) for an orderly stop.
pub struct GatewayHandle {
    tcp_addr: SocketAddr,
    http_addr: SocketAddr,
    events: Sender<Event>,
    router: Option<JoinHandle<()>>,
    listeners: Vec<ListenerHandle>,
}

impl GatewayHandle {
    /// Bound address of the raw protocol listener.
    pub fn tcp_addr(&self) -> SocketAddr {
        self.tcp_addr
    }

    /// Bound address of the HTTP listener.
    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    pub(crate) fn event_sender(&self) -> Sender<Event> {
        self.events.clone()
    }

    /// Stops listeners and the router, terminating all cores.
    pub fn shutdown(mut self) {
        for listener in &self.listeners {
            listener.shutdown();
        }
        let _ = self.events.send(Event::Shutdown);
        if let Some(router) = self.router.take() {
            let _ = router.join();
        }
        for listener in self.listeners.drain(..) {
            let _ = listener.join();
        }
    }
}

impl Drop for GatewayHandle {
    fn drop(&mut self) {
        for listener in &self.listeners {
            listener.shutdown();
        }
        let _ = self.events.send(Event::Shutdown);
        if let Some(router) = self.router.take() {
            let _ = router.join();
        }
    }
}

/// Starts the gateway and returns once both listeners are accepting.
pub fn start(config: GatewayConfig) -> Result<GatewayHandle, BootstrapError> {
    config.validate()?;
    telemetry::init(&config.log_filter)?;

    let (events, inbox) = mpsc::channel();
    let authorities = load_authorities(&config);

    let tcp = SocketListener::bind("raw", config.tcp_port)?;
    let http = SocketListener::bind("http", config.http_port)?;
    let tcp_addr = tcp.local_addr();
    let http_addr = http.local_addr();

    let listeners = vec![
        tcp.start(Arc::new(Intake {
            kind: SessionKind::Raw,
            events: events.clone(),
        }))?,
        http.start(Arc::new(Intake {
            kind: SessionKind::Http,
            events: events.clone(),
        }))?,
    ];

    let mut gateway = Gateway::new(&config, authorities, events.clone());
    let router = thread::Builder::new()
        .name("router".to_string())
        .spawn(move || gateway.run(inbox))
        .map_err(|source| BootstrapError::RouterThread { source })?;

    info!(
        target: BOOTSTRAP_TARGET,
        %tcp_addr,
        %http_addr,
        core_binary = %config.core_binary,
        "gateway up"
    );
    Ok(GatewayHandle {
        tcp_addr,
        http_addr,
        events,
        router: Some(router),
        listeners,
    })
}

/// Runs the gateway until SIGINT or SIGTERM arrives.
pub fn run(config: GatewayConfig) -> Result<(), BootstrapError> {
    let handle = start(config)?;
    let mut signals =
        Signals::new([SIGINT, SIGTERM]).map_err(|source| BootstrapError::Signals { source })?;
    if let Some(signal) = signals.forever().next() {
        info!(target: BOOTSTRAP_TARGET, signal, "shutdown signal received");
    }
    handle.shutdown();
    Ok(())
}

/// Loads the configured authorities. A missing or unreadable credential
/// file disables the password authority instead of failing startup, so a
/// freshly installed gateway still serves unauthenticated read access.
fn load_authorities(config: &GatewayConfig) -> Vec<Box<dyn Authority>> {
    match PasswordAuthority::load(
        config.passwd_file.as_std_path(),
        config.group_file.as_std_path(),
    ) {
        Ok(authority) => vec![Box::new(authority)],
        Err(error) => {
            warn!(
                target: AUTH_TARGET,
                passwd_file = %config.passwd_file,
                group_file = %config.group_file,
                %error,
                "password authority disabled"
            );
            Vec::new()
        }
    }
}
