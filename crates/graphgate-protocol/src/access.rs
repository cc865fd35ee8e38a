//! Ordered permission tiers checked against each command's requirement.

use strum::{Display, EnumString};
use thiserror::Error;

/// Access level held by a session and required by commands.
///
/// Levels are totally ordered; a command with requirement `L` is permitted
/// for every session holding at least `L`. Freshly connected sessions start
/// at [`AccessLevel::Read`] until they authorize.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, EnumString, Default,
)]
#[strum(serialize_all = "lowercase")]
pub enum AccessLevel {
    /// Query-only access; the default for unauthenticated sessions.
    #[default]
    Read,
    /// May issue mutating core commands.
    Write,
    /// May manage graph instances and the server itself.
    Admin,
}

/// Error raised when an access-level name cannot be parsed.
#[derive(Debug, Error)]
#[error("unknown access level '{0}'")]
pub struct AccessLevelParseError(pub String);

impl AccessLevel {
    /// Parses a lowercase level name, with a domain error type.
    pub fn parse(value: &str) -> Result<Self, AccessLevelParseError> {
        value
            .parse()
            .map_err(|_| AccessLevelParseError(value.to_string()))
    }
}
