//! Dispatch of the gateway's own commands.
//!
//! A client line whose first word matches the command table is handled
//! locally; everything else belongs to the session's bound core. Dispatch
//! itself only resolves the command and enforces its access level, the
//! handlers do the rest.

mod commands;
mod table;

pub(crate) use self::commands::command_table;
pub(crate) use self::table::{CommandTable, Handler};

use std::io;

use tracing::debug;

use graphgate_protocol::{CoreId, StatusCode, status_line};

use crate::auth::Authority;
use crate::router::CoreRegistry;
use crate::session::Session;

pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// The slice of gateway state a command handler may touch.
///
/// Handlers never remove cores themselves; they record the removal in
/// `dropped_core` and the router completes the teardown after dispatch
/// returns, because failing the core's other waiting clients needs the
/// session registry.
pub(crate) struct CommandContext<'a> {
    pub session: &'a mut Session,
    pub registry: &'a mut CoreRegistry,
    pub authorities: &'a [Box<dyn Authority>],
    pub table: &'a CommandTable,
    pub dropped_core: Option<CoreId>,
}

/// Executes one command line against the command table.
///
/// The returned error is a failure to write to the client, never a command
/// failure; those are reported to the client as status lines.
pub(crate) fn execute(ctx: &mut CommandContext<'_>, line: &str) -> io::Result<()> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some(&name) = words.first() else {
        return Ok(());
    };
    let Some(spec) = ctx.table.find(name) else {
        return ctx
            .session
            .forward_statusline(&status_line(StatusCode::Failure, "no such server command."));
    };
    if ctx.session.access < spec.level {
        debug!(
            target: DISPATCH_TARGET,
            client = %ctx.session.id(),
            command = name,
            needs = %spec.level,
            has = %ctx.session.access,
            "denying command"
        );
        let message = format!(
            "insufficient access level (command needs {}, you have {})",
            spec.level, ctx.session.access
        );
        return ctx
            .session
            .forward_statusline(&status_line(StatusCode::Failure, &message));
    }
    match spec.handler {
        Handler::Status(handler) => {
            let status = handler(ctx, &words);
            ctx.session.forward_statusline(&status)
        }
        Handler::Full(handler) => handler(ctx, &words),
    }
}
