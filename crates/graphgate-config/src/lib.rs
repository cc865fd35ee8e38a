//! Startup configuration for the graphgate daemon.
//!
//! Configuration is read once from the command line at startup and is
//! immutable afterwards. Everything the gateway needs lives here: the two
//! listen ports, the credential and group files consumed by the password
//! authority, and the path of the core binary spawned for each graph.

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;

/// Default TCP port for the raw line protocol.
pub const DEFAULT_TCP_PORT: u16 = 6666;
/// Default TCP port for HTTP clients.
pub const DEFAULT_HTTP_PORT: u16 = 8090;

/// Resolved daemon configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "graphgated", about = "gateway daemon for graph core processes")]
pub struct GatewayConfig {
    /// Port to listen on for raw protocol connections.
    #[arg(short = 't', long, default_value_t = DEFAULT_TCP_PORT)]
    pub tcp_port: u16,

    /// Port to listen on for HTTP connections.
    #[arg(short = 'H', long, default_value_t = DEFAULT_HTTP_PORT)]
    pub http_port: u16,

    /// Credential file for the password authority (`user:secret` lines).
    #[arg(short = 'p', long, default_value = "graphgate.passwd")]
    pub passwd_file: Utf8PathBuf,

    /// Group file mapping users to access levels (`level:user,user` lines).
    #[arg(short = 'g', long, default_value = "graphgate.groups")]
    pub group_file: Utf8PathBuf,

    /// Path of the core binary spawned for each graph instance.
    #[arg(short = 'c', long, default_value = "graphcore")]
    pub core_binary: Utf8PathBuf,

    /// Log filter expression passed to the tracing subscriber.
    #[arg(long, default_value = "info")]
    pub log_filter: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::parse_from::<_, &str>([])
    }
}

/// Errors raised while validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Both listeners were configured with the same port.
    #[error("tcp and http listeners cannot share port {port}")]
    PortCollision {
        /// The colliding port number.
        port: u16,
    },
}

impl GatewayConfig {
    /// Parses configuration from the process arguments.
    #[must_use]
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Validates cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tcp_port == self.http_port && self.tcp_port != 0 {
            return Err(ConfigError::PortCollision {
                port: self.tcp_port,
            });
        }
        Ok(())
    }
}
