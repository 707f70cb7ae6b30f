#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use uuid::Uuid;

pub fn temp_dir(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{}-{}", prefix, Uuid::new_v4()))
}

/// Spawn the sidecar binary with piped stdio. The child dies with the
/// test process when the pipes close.
pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let mut child = Command::new(env!("CARGO_BIN_EXE_lmsd"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("spawn lmsd sidecar");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

/// One request/response exchange over the line protocol.
pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let line = json!({ "id": id, "method": method, "params": params }).to_string();
    writeln!(stdin, "{}", line).expect("write request");
    stdin.flush().expect("flush request");
    let mut resp = String::new();
    reader.read_line(&mut resp).expect("read response line");
    serde_json::from_str(&resp).expect("parse response JSON")
}

/// Exchange that must succeed; returns the `result` payload.
pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let resp = request(stdin, reader, id, method, params);
    assert_eq!(
        resp.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "expected ok response for {}, got: {}",
        method,
        resp
    );
    resp.get("result").cloned().expect("result payload")
}

/// Exchange that must fail; returns the `error` payload.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let resp = request(stdin, reader, id, method, params);
    assert_eq!(
        resp.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "expected error response for {}, got: {}",
        method,
        resp
    );
    resp.get("error").cloned().expect("error payload")
}

pub fn error_code(error: &Value) -> &str {
    error.get("code").and_then(|v| v.as_str()).unwrap_or("")
}

/// A student CSV row in the shape the import expects.
pub fn student_row(roll: &str, name: &str, email: &str, subjects: &str) -> Value {
    json!({
        "roll_no": roll,
        "name": name,
        "email": email,
        "department": "Computer Science",
        "stream": "Science",
        "division": "A",
        "semester": "3",
        "academic_year": "2025-26",
        "subjects": subjects,
    })
}

pub fn teacher_row(code: &str, name: &str, email: &str, subjects: &str) -> Value {
    json!({
        "teacher_code": code,
        "name": name,
        "email": email,
        "department": "Computer Science",
        "subjects": subjects,
    })
}

/// Count of files spooled into the workspace outbox.
pub fn outbox_count(workspace: &std::path::Path) -> usize {
    match std::fs::read_dir(workspace.join("outbox")) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}
