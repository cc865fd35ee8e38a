//! The gateway's own command set.
//!
//! Command failures are ordinary status lines; the exact wording is part of
//! the client-visible protocol and is asserted by the tests.

use std::io;

use graphgate_protocol::{AccessLevel, StatusCode, status_line};

use crate::router::queue_core_command;

use super::CommandContext;
use super::table::{CommandSpec, CommandTable, Handler};

/// Builds the command table in help-listing order.
pub(crate) fn command_table() -> CommandTable {
    CommandTable::new(vec![
        CommandSpec {
            name: "help",
            synopsis: "help [COMMAND]",
            help: "lists commands, or describes one command.",
            level: AccessLevel::Read,
            handler: Handler::Full(help),
        },
        CommandSpec {
            name: "authorize",
            synopsis: "authorize AUTHORITY CREDENTIALS",
            help: "raises this session's access level.",
            level: AccessLevel::Read,
            handler: Handler::Status(authorize),
        },
        CommandSpec {
            name: "create-graph",
            synopsis: "create-graph GRAPHNAME",
            help: "spawns a core process hosting a new graph instance.",
            level: AccessLevel::Admin,
            handler: Handler::Status(create_graph),
        },
        CommandSpec {
            name: "use-graph",
            synopsis: "use-graph GRAPHNAME",
            help: "binds this session to a running graph instance.",
            level: AccessLevel::Read,
            handler: Handler::Status(use_graph),
        },
        CommandSpec {
            name: "drop-graph",
            synopsis: "drop-graph GRAPHNAME",
            help: "terminates a running graph instance.",
            level: AccessLevel::Admin,
            handler: Handler::Status(drop_graph),
        },
        CommandSpec {
            name: "list-graphs",
            synopsis: "list-graphs",
            help: "lists running graph instances.",
            level: AccessLevel::Read,
            handler: Handler::Full(list_graphs),
        },
        CommandSpec {
            name: "session-info",
            synopsis: "session-info",
            help: "shows this session's graph binding and access level.",
            level: AccessLevel::Read,
            handler: Handler::Full(session_info),
        },
        CommandSpec {
            name: "server-stats",
            synopsis: "server-stats",
            help: "shows gateway-wide statistics.",
            level: AccessLevel::Read,
            handler: Handler::Full(server_stats),
        },
    ])
}

fn syntax_failure(synopsis: &str) -> String {
    status_line(StatusCode::Failure, &format!("syntax: {synopsis}"))
}

fn create_graph(ctx: &mut CommandContext<'_>, words: &[&str]) -> String {
    let &[_, name] = words else {
        return syntax_failure("create-graph GRAPHNAME");
    };
    match ctx.registry.create(name) {
        Ok(core) => status_line(StatusCode::Success, &format!("spawned pid {}.", core.pid())),
        Err(error) => status_line(StatusCode::Failure, &error.to_string()),
    }
}

fn use_graph(ctx: &mut CommandContext<'_>, words: &[&str]) -> String {
    let &[_, name] = words else {
        return syntax_failure("use-graph GRAPHNAME");
    };
    if ctx.session.core.is_some() {
        return status_line(
            StatusCode::Failure,
            "already connected. switching instances is not currently supported.",
        );
    }
    let Some(core) = ctx
        .registry
        .find_named(name)
        .and_then(|id| ctx.registry.find(id))
    else {
        return status_line(StatusCode::Failure, "no such instance.");
    };
    ctx.session.core = Some(core.id());
    status_line(
        StatusCode::Success,
        &format!("connected to pid {}.", core.pid()),
    )
}

fn drop_graph(ctx: &mut CommandContext<'_>, words: &[&str]) -> String {
    let &[_, name] = words else {
        return syntax_failure("drop-graph GRAPHNAME");
    };
    let Some(core) = ctx
        .registry
        .find_named(name)
        .and_then(|id| ctx.registry.find(id))
    else {
        return status_line(StatusCode::Failure, "no such instance.");
    };
    if core.signal_terminate().is_err() {
        return status_line(StatusCode::Failure, "couldn't kill the process.");
    }
    let pid = core.pid();
    ctx.dropped_core = Some(core.id());
    status_line(StatusCode::Success, &format!("killed pid {pid}."))
}

fn authorize(ctx: &mut CommandContext<'_>, words: &[&str]) -> String {
    let &[_, authority_name, credentials] = words else {
        return syntax_failure("authorize AUTHORITY CREDENTIALS");
    };
    let Some(authority) = ctx
        .authorities
        .iter()
        .find(|authority| authority.name() == authority_name)
    else {
        return status_line(
            StatusCode::Failure,
            &format!("no such authority '{authority_name}'."),
        );
    };
    match authority.authorize(credentials) {
        Some(level) => {
            ctx.session.access = level;
            status_line(StatusCode::Success, &format!("access level: {level}"))
        }
        None => status_line(StatusCode::Failure, "authorization failure."),
    }
}

fn list_graphs(ctx: &mut CommandContext<'_>, words: &[&str]) -> io::Result<()> {
    if words.len() != 1 {
        return ctx.session.forward_statusline(&syntax_failure("list-graphs"));
    }
    ctx.session
        .forward_statusline(&status_line(StatusCode::Success, "running graphs:"))?;
    for core in ctx.registry.iter() {
        ctx.session.forward_dataset(core.name())?;
    }
    ctx.session.forward_dataset("")
}

fn session_info(ctx: &mut CommandContext<'_>, words: &[&str]) -> io::Result<()> {
    if words.len() != 1 {
        return ctx
            .session
            .forward_statusline(&syntax_failure("session-info"));
    }
    let graph = ctx
        .session
        .core
        .and_then(|id| ctx.registry.find(id))
        .map_or_else(|| "None".to_string(), |core| core.name().to_string());
    ctx.session
        .forward_statusline(&status_line(StatusCode::Success, "session info:"))?;
    ctx.session
        .forward_dataset(&format!("ConnectedGraph,{graph}"))?;
    ctx.session
        .forward_dataset(&format!("AccessLevel,{}", ctx.session.access))?;
    ctx.session.forward_dataset("")
}

fn server_stats(ctx: &mut CommandContext<'_>, words: &[&str]) -> io::Result<()> {
    if words.len() != 1 {
        return ctx
            .session
            .forward_statusline(&syntax_failure("server-stats"));
    }
    ctx.session
        .forward_statusline(&status_line(StatusCode::Success, "server info:"))?;
    ctx.session
        .forward_dataset(&format!("NCores,{}", ctx.registry.len()))?;
    ctx.session.forward_dataset("")
}

/// Lists the gateway's commands, then hands off to the bound core's own
/// `help` so its commands appear in the same response.
fn help(ctx: &mut CommandContext<'_>, words: &[&str]) -> io::Result<()> {
    if words.len() > 2 {
        return ctx
            .session
            .forward_statusline(&syntax_failure("help [COMMAND]"));
    }
    let bound = ctx
        .session
        .core
        .filter(|id| ctx.registry.find(*id).is_some())
        .is_some();

    if let Some(&topic) = words.get(1) {
        if let Some(spec) = ctx.table.find(topic) {
            ctx.session
                .forward_statusline(&status_line(StatusCode::Success, &format!("{topic}:")))?;
            ctx.session.forward_dataset(&format!("# {}", spec.synopsis))?;
            ctx.session.forward_dataset(&format!("# {}", spec.help))?;
            return ctx.session.forward_dataset("");
        }
        if bound {
            let _ = queue_core_command(ctx.registry, ctx.session, format!("help {topic}"));
            return Ok(());
        }
        return ctx.session.forward_statusline(&status_line(
            StatusCode::Failure,
            &format!("no such command '{topic}'."),
        ));
    }

    ctx.session
        .forward_statusline(&status_line(StatusCode::Success, "available commands:"))?;
    for spec in ctx.table.iter() {
        ctx.session.forward_dataset(&format!("# {}", spec.synopsis))?;
    }
    if bound {
        ctx.session
            .forward_dataset("# commands provided by the connected graph core:")?;
        let _ = queue_core_command(ctx.registry, ctx.session, "help".to_string());
        Ok(())
    } else {
        ctx.session.forward_dataset("")
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::mpsc;

    use graphgate_protocol::CoreId;

    use crate::auth::{Authority, PasswordAuthority};
    use crate::dispatch::{CommandContext, execute};
    use crate::router::CoreRegistry;
    use crate::session::Session;
    use crate::session::test_support::{RecordingLink, raw_session};

    use super::*;

    struct Fixture {
        session: Session,
        link: RecordingLink,
        registry: CoreRegistry,
        authorities: Vec<Box<dyn Authority>>,
        table: CommandTable,
    }

    impl Fixture {
        fn new() -> Self {
            let (tx, _rx) = mpsc::channel();
            let (session, link) = raw_session(7);
            Self {
                session,
                link,
                registry: CoreRegistry::new(PathBuf::from("/nonexistent/graphcore"), tx),
                authorities: vec![Box::new(PasswordAuthority::from_contents(
                    "root:secret\n",
                    "admin:root\n",
                ))],
                table: command_table(),
            }
        }

        fn fake_core(&mut self, name: &str) -> CoreId {
            self.registry.insert_fake(name, Box::new(Vec::new()))
        }

        fn run(&mut self, line: &str) -> Option<CoreId> {
            let mut ctx = CommandContext {
                session: &mut self.session,
                registry: &mut self.registry,
                authorities: &self.authorities,
                table: &self.table,
                dropped_core: None,
            };
            execute(&mut ctx, line).expect("dispatch");
            ctx.dropped_core
        }

        fn output(&self) -> String {
            self.link.contents()
        }
    }

    #[test]
    fn unknown_command_fails() {
        let mut fx = Fixture::new();
        fx.run("frobnicate now");
        assert_eq!(fx.output(), "FAIL! no such server command.\n");
    }

    #[test]
    fn access_level_is_enforced() {
        let mut fx = Fixture::new();
        fx.run("drop-graph wiki");
        assert_eq!(
            fx.output(),
            "FAIL! insufficient access level (command needs admin, you have read)\n"
        );
    }

    #[test]
    fn bad_argument_count_reports_syntax() {
        let mut fx = Fixture::new();
        fx.session.access = AccessLevel::Admin;
        fx.run("create-graph");
        assert_eq!(fx.output(), "FAIL! syntax: create-graph GRAPHNAME\n");
    }

    #[test]
    fn authorize_grants_the_group_level() {
        let mut fx = Fixture::new();
        fx.run("authorize password root:secret");
        assert_eq!(fx.output(), "OK. access level: admin\n");
        assert_eq!(fx.session.access, AccessLevel::Admin);
    }

    #[test]
    fn authorize_rejects_bad_credentials() {
        let mut fx = Fixture::new();
        fx.run("authorize password root:wrong");
        assert_eq!(fx.output(), "FAIL! authorization failure.\n");
        assert_eq!(fx.session.access, AccessLevel::Read);
    }

    #[test]
    fn authorize_rejects_unknown_authority() {
        let mut fx = Fixture::new();
        fx.run("authorize ldap root:secret");
        assert_eq!(fx.output(), "FAIL! no such authority 'ldap'.\n");
    }

    #[test]
    fn use_graph_binds_the_session() {
        let mut fx = Fixture::new();
        let id = fx.fake_core("wiki");
        fx.run("use-graph wiki");
        assert_eq!(fx.output(), "OK. connected to pid 0.\n");
        assert_eq!(fx.session.core, Some(id));
    }

    #[test]
    fn use_graph_rejects_unknown_instance() {
        let mut fx = Fixture::new();
        fx.run("use-graph nowhere");
        assert_eq!(fx.output(), "FAIL! no such instance.\n");
    }

    #[test]
    fn use_graph_rejects_rebinding() {
        let mut fx = Fixture::new();
        fx.fake_core("wiki");
        fx.fake_core("other");
        fx.run("use-graph wiki");
        fx.run("use-graph other");
        assert!(fx.output().ends_with(
            "FAIL! already connected. switching instances is not currently supported.\n"
        ));
    }

    #[test]
    fn drop_graph_reports_the_removal_to_the_router() {
        let mut fx = Fixture::new();
        let id = fx.fake_core("wiki");
        fx.session.access = AccessLevel::Admin;
        let dropped = fx.run("drop-graph wiki");
        assert_eq!(dropped, Some(id));
        assert_eq!(fx.output(), "OK. killed pid 0.\n");
    }

    #[test]
    fn drop_graph_rejects_unknown_instance() {
        let mut fx = Fixture::new();
        fx.session.access = AccessLevel::Admin;
        assert_eq!(fx.run("drop-graph nope"), None);
        assert_eq!(fx.output(), "FAIL! no such instance.\n");
    }

    #[test]
    fn list_graphs_streams_a_dataset() {
        let mut fx = Fixture::new();
        fx.fake_core("wiki");
        fx.run("list-graphs");
        assert_eq!(fx.output(), "OK. running graphs:\nwiki\n\n");
    }

    #[test]
    fn session_info_reflects_the_binding() {
        let mut fx = Fixture::new();
        fx.fake_core("wiki");
        fx.run("use-graph wiki");
        fx.run("session-info");
        assert!(fx.output().ends_with(
            "OK. session info:\nConnectedGraph,wiki\nAccessLevel,read\n\n"
        ));
    }

    #[test]
    fn session_info_without_binding_shows_none() {
        let mut fx = Fixture::new();
        fx.run("session-info");
        assert_eq!(
            fx.output(),
            "OK. session info:\nConnectedGraph,None\nAccessLevel,read\n\n"
        );
    }

    #[test]
    fn server_stats_counts_cores() {
        let mut fx = Fixture::new();
        fx.fake_core("wiki");
        fx.run("server-stats");
        assert_eq!(fx.output(), "OK. server info:\nNCores,1\n\n");
    }

    #[test]
    fn help_lists_every_command() {
        let mut fx = Fixture::new();
        fx.run("help");
        let output = fx.output();
        assert!(output.starts_with("OK. available commands:\n# help [COMMAND]\n"));
        assert!(output.contains("# drop-graph GRAPHNAME\n"));
        assert!(output.ends_with("\n\n"));
    }

    #[test]
    fn help_describes_a_single_command() {
        let mut fx = Fixture::new();
        fx.run("help use-graph");
        assert_eq!(
            fx.output(),
            "OK. use-graph:\n# use-graph GRAPHNAME\n# binds this session to a running graph instance.\n\n"
        );
    }

    #[test]
    fn help_for_unknown_topic_fails_when_unbound() {
        let mut fx = Fixture::new();
        fx.run("help traverse");
        assert_eq!(fx.output(), "FAIL! no such command 'traverse'.\n");
    }
}
