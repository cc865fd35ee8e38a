//! Shared wire vocabulary for the graphgate gateway.
//!
//! Both the daemon and the core host speak the same line-oriented text
//! protocol: a command line in, exactly one status line out, optionally
//! followed by a dataset terminated by a blank line. This crate defines the
//! status-token vocabulary, the ordered access levels checked by the command
//! dispatcher, and the id newtypes used to key the daemon's registries.

mod access;
mod ids;
mod status;

pub use access::{AccessLevel, AccessLevelParseError};
pub use ids::{ClientId, CoreId};
pub use status::{
    DATASET_MARKER, StatusCode, line_is_blank, line_opens_dataset, status_line,
};
