use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_studentd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn studentd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn create_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    first: &str,
    email: &str,
) -> String {
    let created = request_ok(
        stdin,
        reader,
        id,
        "students.create",
        json!({
            "firstName": first,
            "lastName": "Test",
            "email": email,
            "password": "a-sufficient-password"
        }),
    );
    created
        .get("student")
        .and_then(|s| s.get("id"))
        .and_then(|v| v.as_str())
        .expect("student id")
        .to_string()
}

#[test]
fn average_of_three_grades_is_their_mean() {
    let workspace = temp_dir("studentd-average");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let student_id = create_student(&mut stdin, &mut reader, "2", "A", "a@example.org");
    for (i, v) in [12.0, 15.0, 9.0].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("g{}", i),
            "grades.add",
            json!({ "studentId": student_id, "value": v }),
        );
    }

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.grades",
        json!({ "studentId": student_id }),
    );
    let grades = res
        .get("grades")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(grades.len(), 3);
    let avg = res
        .get("average")
        .and_then(|v| v.as_f64())
        .expect("average present and numeric");
    assert!((avg - 12.0).abs() < 1e-9, "expected 12.0, got {}", avg);
}

#[test]
fn student_without_grades_has_null_average() {
    let workspace = temp_dir("studentd-average-empty");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let student_id = create_student(&mut stdin, &mut reader, "2", "B", "b@example.org");
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.grades",
        json!({ "studentId": student_id }),
    );
    assert_eq!(
        res.get("grades").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );
    // Undefined average, not zero.
    assert_eq!(res.get("average"), Some(&serde_json::Value::Null));
}
