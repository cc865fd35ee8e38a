//! The command table.

use std::io;

use graphgate_protocol::AccessLevel;

use super::CommandContext;

/// Handler behind one command-table entry.
///
/// Most commands produce exactly one status line and let dispatch forward
/// it. Commands that emit datasets or hand work to a core drive the session
/// themselves.
#[derive(Clone, Copy)]
pub(crate) enum Handler {
    Status(fn(&mut CommandContext<'_>, &[&str]) -> String),
    Full(fn(&mut CommandContext<'_>, &[&str]) -> io::Result<()>),
}

/// One dispatchable command.
pub(crate) struct CommandSpec {
    pub name: &'static str,
    pub synopsis: &'static str,
    pub help: &'static str,
    /// Minimum access level; dispatch rejects callers below it.
    pub level: AccessLevel,
    pub handler: Handler,
}

/// Registration-ordered command table; `help` lists entries in this order.
pub(crate) struct CommandTable {
    commands: Vec<CommandSpec>,
}

impl CommandTable {
    pub fn new(commands: Vec<CommandSpec>) -> Self {
        Self { commands }
    }

    pub fn find(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.iter().find(|spec| spec.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandSpec> {
        self.commands.iter()
    }
}
