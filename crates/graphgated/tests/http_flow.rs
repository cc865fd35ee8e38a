//! HTTP endpoint behaviour: one command per request, status mapping, and
//! connection close after the response.

use std::fs;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use camino::Utf8PathBuf;
use tempfile::TempDir;

use graphgate_config::GatewayConfig;
use graphgated::{GatewayHandle, start};

fn utf8(path: std::path::PathBuf) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path).expect("utf8 path")
}

fn gateway() -> (GatewayHandle, TempDir) {
    let dir = TempDir::new().expect("tempdir");
    fs::write(dir.path().join("graphgate.passwd"), "admin:secret\n").expect("write passwd");
    fs::write(dir.path().join("graphgate.groups"), "admin:admin\n").expect("write groups");

    let mut config = GatewayConfig::default();
    config.tcp_port = 0;
    config.http_port = 0;
    config.core_binary = utf8(dir.path().join("graphcore"));
    config.passwd_file = utf8(dir.path().join("graphgate.passwd"));
    config.group_file = utf8(dir.path().join("graphgate.groups"));
    let handle = start(config).expect("start gateway");
    (handle, dir)
}

/// Sends one request and reads the whole response; the server closing the
/// connection terminates the read.
fn request(handle: &GatewayHandle, request_line: &str) -> String {
    let mut stream = TcpStream::connect(handle.http_addr()).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");
    write!(stream, "{request_line}\r\n\r\n").expect("send request");
    let mut response = String::new();
    stream.read_to_string(&mut response).expect("read response");
    response
}

#[test]
fn success_status_maps_to_200() {
    let (handle, _dir) = gateway();
    let response = request(&handle, "GET /server-stats HTTP/1.0");

    assert!(response.starts_with("HTTP/1.0 200 OK\r\n"), "{response}");
    assert!(response.contains("Content-Type: text/plain\r\n"));
    assert!(response.contains("X-Graphgate-Status: OK. server info:\r\n"));
    assert!(response.ends_with("OK. server info:\nNCores,0\n\n"));

    handle.shutdown();
}

#[test]
fn failure_status_maps_to_400() {
    let (handle, _dir) = gateway();
    let response = request(&handle, "GET /frobnicate HTTP/1.0");

    assert!(response.starts_with("HTTP/1.0 400 Bad Request\r\n"), "{response}");
    assert!(response.contains("X-Graphgate-Status: FAIL! no such server command.\r\n"));

    handle.shutdown();
}

#[test]
fn plus_signs_decode_to_spaces() {
    let (handle, _dir) = gateway();
    let response = request(&handle, "GET /authorize+password+admin:secret HTTP/1.1");

    assert!(response.starts_with("HTTP/1.0 200 OK\r\n"), "{response}");
    assert!(response.contains("X-Graphgate-Status: OK. access level: admin\r\n"));

    handle.shutdown();
}

#[test]
fn unsupported_method_is_rejected() {
    let (handle, _dir) = gateway();
    let response = request(&handle, "POST /server-stats HTTP/1.0");

    assert!(response.starts_with("HTTP/1.0 400 Bad Request\r\n"), "{response}");
    assert!(response.contains("unsupported HTTP method 'POST'"));

    handle.shutdown();
}

#[test]
fn dataset_response_streams_in_the_body() {
    let (handle, _dir) = gateway();
    let response = request(&handle, "GET /list-graphs HTTP/1.0");

    assert!(response.starts_with("HTTP/1.0 200 OK\r\n"), "{response}");
    assert!(response.ends_with("OK. running graphs:\n\n"));

    handle.shutdown();
}
