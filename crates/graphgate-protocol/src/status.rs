//! Status-line vocabulary spoken between the gateway, cores, and clients.
//!
//! Every reply begins with a status line whose first token is one of a small
//! fixed set. A colon anywhere in the status line signals that dataset lines
//! follow, terminated by a single blank line.

/// Character that marks a status line (or an outgoing command) as carrying a
/// dataset.
pub const DATASET_MARKER: char = ':';

/// Outcome classification carried by the first token of a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// The command succeeded (`OK.`).
    Success,
    /// The command failed through client error (`FAIL!`).
    Failure,
    /// The command failed through an internal error (`ERROR!`).
    Error,
    /// The requested item does not exist (`NONE.`).
    NotFound,
}

impl StatusCode {
    /// The literal first token used on the wire.
    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            Self::Success => "OK.",
            Self::Failure => "FAIL!",
            Self::Error => "ERROR!",
            Self::NotFound => "NONE.",
        }
    }

    /// Classifies a status line by its first token.
    ///
    /// Returns `None` when the line is empty or the first token is outside
    /// the fixed vocabulary, which callers treat as a protocol violation.
    #[must_use]
    pub fn classify(line: &str) -> Option<Self> {
        match line.split_whitespace().next()? {
            "OK." => Some(Self::Success),
            "FAIL!" => Some(Self::Failure),
            "ERROR!" => Some(Self::Error),
            "NONE." => Some(Self::NotFound),
            _ => None,
        }
    }

    /// The HTTP status code and reason phrase this outcome maps to.
    #[must_use]
    pub fn http_status(self) -> (u16, &'static str) {
        match self {
            Self::Success => (200, "OK"),
            Self::Failure => (400, "Bad Request"),
            Self::Error => (500, "Internal Server Error"),
            Self::NotFound => (404, "Not Found"),
        }
    }
}

/// Formats a status line from an outcome and a message.
#[must_use]
pub fn status_line(code: StatusCode, message: &str) -> String {
    format!("{} {}", code.token(), message)
}

/// True when the line carries the dataset marker, meaning dataset lines
/// follow (for replies) or are about to be supplied (for commands).
#[must_use]
pub fn line_opens_dataset(line: &str) -> bool {
    line.contains(DATASET_MARKER)
}

/// True when the line has no whitespace-separated tokens. A blank line
/// terminates a dataset in both directions.
#[must_use]
pub fn line_is_blank(line: &str) -> bool {
    line.split_whitespace().next().is_none()
}
