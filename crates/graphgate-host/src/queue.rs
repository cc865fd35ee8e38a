//! Per-core command queue entries.

use graphgate_protocol::{ClientId, line_is_blank, line_opens_dataset};

/// One queued command bound for a core, together with the client it
/// originated from.
///
/// A command whose line carries the dataset marker is buffered until the
/// client has supplied the full dataset payload (terminated by a blank
/// line); only then does it become flushable. A command is never partially
/// transmitted to a core.
#[derive(Debug)]
pub struct CommandQEntry {
    /// The command line, without trailing newline.
    pub command: String,
    /// Dataset lines supplied by the client, including the terminating blank
    /// line once complete.
    pub dataset: Vec<String>,
    client: ClientId,
    complete: bool,
}

impl CommandQEntry {
    /// Creates an entry for the given client. Commands without the dataset
    /// marker are immediately flushable.
    #[must_use]
    pub fn new(client: ClientId, command: String) -> Self {
        let complete = !line_opens_dataset(&command);
        Self {
            command,
            dataset: Vec::new(),
            client,
            complete,
        }
    }

    /// The client whose reply stream this entry will own.
    #[must_use]
    pub fn client(&self) -> ClientId {
        self.client
    }

    /// Appends one dataset line supplied by the client. A blank line
    /// completes the entry.
    ///
    /// Returns `true` once the entry has become flushable.
    pub fn push_dataset_line(&mut self, line: String) -> bool {
        let blank = line_is_blank(&line);
        self.dataset.push(line);
        if blank {
            self.complete = true;
        }
        self.complete
    }

    /// True once the full command, including any dataset payload, has been
    /// buffered and may be transmitted in one piece.
    #[must_use]
    pub fn flushable(&self) -> bool {
        self.complete
    }

    /// Serializes the command and its dataset as the newline-terminated
    /// bytes the core reads from stdin.
    #[must_use]
    pub fn payload(&self) -> Vec<u8> {
        let length = self.command.len()
            + 1
            + self
                .dataset
                .iter()
                .map(|line| line.len() + 1)
                .sum::<usize>();
        let mut payload = Vec::with_capacity(length);
        payload.extend_from_slice(self.command.as_bytes());
        payload.push(b'\n');
        for line in &self.dataset {
            payload.extend_from_slice(line.as_bytes());
            payload.push(b'\n');
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ClientId {
        ClientId(7)
    }

    #[test]
    fn plain_command_is_immediately_flushable() {
        let entry = CommandQEntry::new(client(), "list-nodes".into());
        assert!(entry.flushable());
    }

    #[test]
    fn dataset_command_waits_for_blank_line() {
        let mut entry = CommandQEntry::new(client(), "add-arcs:".into());
        assert!(!entry.flushable());
        assert!(!entry.push_dataset_line("1,2".into()));
        assert!(!entry.push_dataset_line("2,3".into()));
        assert!(entry.push_dataset_line(String::new()));
        assert!(entry.flushable());
        assert_eq!(entry.dataset.len(), 3);
    }

    #[test]
    fn payload_terminates_every_line() {
        let mut entry = CommandQEntry::new(client(), "add-arcs:".into());
        entry.push_dataset_line("1,2".into());
        entry.push_dataset_line(String::new());
        assert_eq!(entry.payload(), b"add-arcs:\n1,2\n\n");
    }
}
