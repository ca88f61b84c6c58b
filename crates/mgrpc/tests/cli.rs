#![cfg(feature = "cli")]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::process::{Command, Output};
use std::thread;

use serde_json::{json, Value};

/// Length-prefixed JSON responder: answers `Sys.Ping`, rejects everything else.
fn spawn_responder(reply: bool) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
    let addr = listener.local_addr().expect("bound address");
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { return };
            thread::spawn(move || serve(stream, reply));
        }
    });
    format!("tcp://{addr}")
}

fn serve(mut stream: TcpStream, reply: bool) {
    loop {
        let mut header = [0u8; 4];
        if stream.read_exact(&mut header).is_err() {
            return;
        }
        let mut body = vec![0u8; u32::from_le_bytes(header) as usize];
        if stream.read_exact(&mut body).is_err() {
            return;
        }
        if !reply {
            continue;
        }

        let frame: Value = serde_json::from_slice(&body).expect("client sends JSON frames");
        let cmd = &frame["cmd"];
        let id = cmd["id"].as_i64().expect("request carries an id");
        let resp = match cmd["cmd"].as_str() {
            Some("Sys.Ping") => json!({ "id": id, "resp": { "pong": true, "args": cmd["args"] } }),
            _ => json!({ "id": id, "status": 404, "status_msg": "no such method" }),
        };
        let out = json!({
            "v": 1,
            "src": frame["dst"].as_str().unwrap_or(""),
            "dst": frame["src"].as_str().unwrap_or(""),
            "resp": resp,
        });
        let bytes = serde_json::to_vec(&out).expect("serializable reply");
        if stream
            .write_all(&(bytes.len() as u32).to_le_bytes())
            .and_then(|()| stream.write_all(&bytes))
            .is_err()
        {
            return;
        }
    }
}

fn mgrpc(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_mgrpc"))
        .args(["--log-level", "error", "--format", "json"])
        .args(args)
        .output()
        .expect("mgrpc should run")
}

#[test]
fn call_prints_response_json() {
    let address = spawn_responder(true);
    let output = mgrpc(&["call", &address, "Sys.Ping", "--args", r#"{"x":1}"#]);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let printed: Value = serde_json::from_str(stdout.trim()).expect("stdout is one JSON object");
    assert_eq!(printed["method"], "Sys.Ping");
    assert_eq!(printed["status"], 0);
    assert_eq!(printed["resp"]["pong"], true);
    assert_eq!(printed["resp"]["args"]["x"], 1);
}

#[test]
fn nonzero_status_exits_10() {
    let address = spawn_responder(true);
    let output = mgrpc(&["call", &address, "Sys.Nope"]);

    assert_eq!(output.status.code(), Some(10));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"status\":404"));
    assert!(stdout.contains("no such method"));
}

#[test]
fn silent_peer_times_out_with_124() {
    let address = spawn_responder(false);
    let output = mgrpc(&["call", &address, "Sys.Ping", "--timeout", "200ms"]);

    assert_eq!(output.status.code(), Some(124));
    assert!(String::from_utf8_lossy(&output.stderr).contains("timed out"));
}

#[test]
fn refused_connection_exits_3() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
    let address = format!("tcp://{}", listener.local_addr().expect("bound address"));
    drop(listener);

    let output = mgrpc(&["call", &address, "Sys.Ping"]);
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn invalid_args_json_exits_64() {
    let output = mgrpc(&["call", "tcp://127.0.0.1:1", "Sys.Ping", "--args", "{oops"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn unknown_scheme_exits_64() {
    let output = mgrpc(&["call", "gopher://device", "Sys.Ping"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn version_prints_name() {
    let output = mgrpc(&["version"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("mgrpc "));
}
