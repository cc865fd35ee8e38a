//! Registry id newtypes.
//!
//! Ids are allocated from monotonic counters owned by the router and are
//! never reused within a process lifetime, so a stale id reliably fails to
//! resolve instead of aliasing a newer client or core.

use std::fmt;

/// Identifies one connected client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "client-{}", self.0)
    }
}

/// Identifies one core instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoreId(pub u64);

impl fmt::Display for CoreId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "core-{}", self.0)
    }
}
