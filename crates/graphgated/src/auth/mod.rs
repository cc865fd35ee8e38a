//! Pluggable credential checks.
//!
//! An authority answers exactly one question: do these credentials
//! authorize, and at which access level. The gateway ships one backend, the
//! password authority, fed by a credential file and a group file loaded at
//! startup.

mod password;

pub(crate) use self::password::PasswordAuthority;

use graphgate_protocol::AccessLevel;

pub(crate) const AUTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::auth");

/// Credential check contract.
pub(crate) trait Authority: Send {
    /// Name clients pass to the `authorize` command.
    fn name(&self) -> &str;

    /// Checks credentials, returning the granted access level on success.
    fn authorize(&self, credentials: &str) -> Option<AccessLevel>;
}
