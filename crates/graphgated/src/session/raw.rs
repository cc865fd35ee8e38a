//! Raw line-protocol rendering: every forwarded line goes to the client
//! verbatim, newline-terminated.

use std::io::{self, Write};

use super::Renderer;

#[derive(Debug, Default)]
pub(crate) struct RawRenderer;

impl Renderer for RawRenderer {
    fn forward_statusline(&mut self, link: &mut dyn Write, line: &str) -> io::Result<()> {
        write_line(link, line)
    }

    fn forward_dataset(&mut self, link: &mut dyn Write, line: &str) -> io::Result<()> {
        write_line(link, line)
    }
}

fn write_line(link: &mut dyn Write, line: &str) -> io::Result<()> {
    link.write_all(line.as_bytes())?;
    link.write_all(b"\n")?;
    link.flush()
}
