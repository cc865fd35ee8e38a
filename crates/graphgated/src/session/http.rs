//! HTTP rendering and request parsing.
//!
//! An HTTP client issues one command per connection: the request path is
//! the percent-encoded command line. The core's status line is classified
//! into an HTTP status code, carried verbatim in the `X-Graphgate-Status`
//! header, and repeated as the first body line; dataset lines follow as the
//! rest of the body. The connection closes once the response completes.

use std::io::{self, Write};

use percent_encoding::percent_decode_str;
use thiserror::Error;

use graphgate_protocol::{StatusCode, line_is_blank, line_opens_dataset};

use super::Renderer;

/// Response header carrying the raw status line.
const STATUS_HEADER: &str = "X-Graphgate-Status";

/// Errors raised while extracting a command line from an HTTP request.
#[derive(Debug, Error)]
pub(crate) enum HttpRequestError {
    /// The request line did not have the `METHOD PATH VERSION` shape.
    #[error("malformed HTTP request line")]
    MalformedRequestLine,
    /// Only GET is supported.
    #[error("unsupported HTTP method '{0}'")]
    UnsupportedMethod(String),
    /// The path did not percent-decode to UTF-8.
    #[error("request path is not valid percent-encoded UTF-8")]
    BadEncoding,
}

/// Extracts the command line from an HTTP request line.
///
/// The leading slash is stripped, `+` decodes to a space, and
/// percent-escapes are resolved.
pub(crate) fn command_line_from_request(request_line: &str) -> Result<String, HttpRequestError> {
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or(HttpRequestError::MalformedRequestLine)?;
    let path = parts.next().ok_or(HttpRequestError::MalformedRequestLine)?;
    if parts.next().is_none() {
        return Err(HttpRequestError::MalformedRequestLine);
    }
    if !method.eq_ignore_ascii_case("GET") {
        return Err(HttpRequestError::UnsupportedMethod(method.to_string()));
    }
    let encoded = path.strip_prefix('/').unwrap_or(path).replace('+', " ");
    percent_decode_str(&encoded)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| HttpRequestError::BadEncoding)
}

/// Writes a complete plain-text HTTP response in one piece.
pub(crate) fn write_plain_response(
    link: &mut dyn Write,
    status: u16,
    reason: &str,
    body: &str,
) -> io::Result<()> {
    write!(
        link,
        "HTTP/1.0 {status} {reason}\r\nContent-Type: text/plain\r\n\r\n{body}\n"
    )?;
    link.flush()
}

/// HTTP protocol renderer.
#[derive(Debug, Default)]
pub(crate) struct HttpRenderer {
    commands_executed: u32,
    expecting_dataset: bool,
    finished: bool,
}

impl HttpRenderer {
    fn write_header(
        &self,
        link: &mut dyn Write,
        status: u16,
        reason: &str,
        raw_status_line: &str,
    ) -> io::Result<()> {
        write!(
            link,
            "HTTP/1.0 {status} {reason}\r\nContent-Type: text/plain\r\n{STATUS_HEADER}: {raw_status_line}\r\n\r\n"
        )
    }
}

impl Renderer for HttpRenderer {
    fn forward_statusline(&mut self, link: &mut dyn Write, line: &str) -> io::Result<()> {
        self.commands_executed += 1;
        // The header is emitted once per physical connection; later status
        // lines degrade to raw behaviour.
        if self.commands_executed > 1 {
            link.write_all(line.as_bytes())?;
            link.write_all(b"\n")?;
            return link.flush();
        }

        if line_is_blank(line) {
            self.finished = true;
            return write_plain_response(
                link,
                500,
                "Internal Server Error",
                "received empty status line from core",
            );
        }

        let (status, reason) = match StatusCode::classify(line) {
            Some(code) => code.http_status(),
            None => (500, "Invalid Core Status Line"),
        };
        self.write_header(link, status, reason, line)?;
        link.write_all(line.as_bytes())?;
        link.write_all(b"\n")?;
        link.flush()?;

        if line_opens_dataset(line) {
            self.expecting_dataset = true;
        } else {
            self.finished = true;
        }
        Ok(())
    }

    fn forward_dataset(&mut self, link: &mut dyn Write, line: &str) -> io::Result<()> {
        link.write_all(line.as_bytes())?;
        link.write_all(b"\n")?;
        link.flush()?;
        if self.expecting_dataset && line_is_blank(line) {
            self.expecting_dataset = false;
            self.finished = true;
        }
        Ok(())
    }

    fn conversation_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("GET /server-stats HTTP/1.0", "server-stats")]
    #[case("GET /use-graph%20wiki HTTP/1.1", "use-graph wiki")]
    #[case("GET /list-graphs+now HTTP/1.0", "list-graphs now")]
    fn decodes_request_lines(#[case] request: &str, #[case] expected: &str) {
        let line = command_line_from_request(request).expect("decode request");
        assert_eq!(line, expected);
    }

    #[test]
    fn rejects_non_get_methods() {
        let error = command_line_from_request("PUT /x HTTP/1.0").expect_err("reject PUT");
        assert!(matches!(error, HttpRequestError::UnsupportedMethod(_)));
    }

    #[test]
    fn rejects_short_request_lines() {
        let error = command_line_from_request("GET").expect_err("reject");
        assert!(matches!(error, HttpRequestError::MalformedRequestLine));
    }

    #[test]
    fn success_status_without_dataset_finishes_conversation() {
        let mut renderer = HttpRenderer::default();
        let mut out = Vec::new();
        renderer
            .forward_statusline(&mut out, "OK. connected to pid 7.")
            .expect("forward");

        let response = String::from_utf8(out).expect("utf8");
        assert!(response.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(response.contains("X-Graphgate-Status: OK. connected to pid 7.\r\n"));
        assert!(response.ends_with("\r\n\r\nOK. connected to pid 7.\n"));
        assert!(renderer.conversation_finished());
    }

    #[test]
    fn failure_status_maps_to_400() {
        let mut renderer = HttpRenderer::default();
        let mut out = Vec::new();
        renderer
            .forward_statusline(&mut out, "FAIL! no such server command.")
            .expect("forward");

        let response = String::from_utf8(out).expect("utf8");
        assert!(response.starts_with("HTTP/1.0 400 Bad Request\r\n"));
        assert!(renderer.conversation_finished());
    }

    #[test]
    fn dataset_status_finishes_after_terminator() {
        let mut renderer = HttpRenderer::default();
        let mut out = Vec::new();
        renderer
            .forward_statusline(&mut out, "OK. running graphs:")
            .expect("status");
        assert!(!renderer.conversation_finished());

        renderer.forward_dataset(&mut out, "wiki").expect("line");
        assert!(!renderer.conversation_finished());
        renderer.forward_dataset(&mut out, "").expect("terminator");
        assert!(renderer.conversation_finished());

        let response = String::from_utf8(out).expect("utf8");
        assert!(response.ends_with("OK. running graphs:\nwiki\n\n"));
    }

    #[test]
    fn unknown_status_token_maps_to_500() {
        let mut renderer = HttpRenderer::default();
        let mut out = Vec::new();
        renderer
            .forward_statusline(&mut out, "WAT? unexpected.")
            .expect("forward");
        let response = String::from_utf8(out).expect("utf8");
        assert!(response.starts_with("HTTP/1.0 500 Invalid Core Status Line\r\n"));
    }

    #[test]
    fn second_statusline_degrades_to_raw() {
        let mut renderer = HttpRenderer::default();
        let mut out = Vec::new();
        renderer
            .forward_statusline(&mut out, "OK. first.")
            .expect("first");
        out.clear();
        renderer
            .forward_statusline(&mut out, "OK. second.")
            .expect("second");
        assert_eq!(out, b"OK. second.\n");
    }
}
