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

fn request_raw(
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
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request_raw(stdin, reader, id, method, params);
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

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request_raw(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

#[test]
fn students_create_list_get_update_flow() {
    let workspace = temp_dir("studentd-crud");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "h", "health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({
            "firstName": "Ada",
            "lastName": "Lovelace",
            "email": "ada@example.org",
            "password": "enchantress-of-numbers"
        }),
    );
    let student = created.get("student").expect("student in result");
    let student_id = student
        .get("id")
        .and_then(|v| v.as_str())
        .expect("student id")
        .to_string();
    assert_eq!(
        student.get("roles"),
        Some(&json!(["ROLE_STUDENT"])),
        "roles set once at creation"
    );
    assert_eq!(student.get("classLevel"), Some(&serde_json::Value::Null));

    let listed = request_ok(&mut stdin, &mut reader, "3", "students.list", json!({}));
    let students = listed
        .get("students")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(students.len(), 1);
    assert_eq!(
        students[0].get("email").and_then(|v| v.as_str()),
        Some("ada@example.org")
    );

    let got = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.get",
        json!({ "studentId": student_id }),
    );
    let hash_before = got
        .get("student")
        .and_then(|s| s.get("passwordHash"))
        .and_then(|v| v.as_str())
        .expect("passwordHash")
        .to_string();

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.update",
        json!({ "studentId": student_id, "lastName": "Byron", "email": "ada@lovelace.example" }),
    );
    let student = updated.get("student").expect("student in result");
    assert_eq!(
        student.get("lastName").and_then(|v| v.as_str()),
        Some("Byron")
    );
    assert_eq!(
        student.get("firstName").and_then(|v| v.as_str()),
        Some("Ada"),
        "untouched fields keep their values"
    );
    assert_eq!(
        student.get("passwordHash").and_then(|v| v.as_str()),
        Some(hash_before.as_str()),
        "profile update must not touch the credential"
    );
    let history = student
        .get("previousPasswords")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(history.len(), 1, "update must not grow history");
}

#[test]
fn update_rejects_password_key_and_unknown_student() {
    let workspace = temp_dir("studentd-update-errors");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({
            "firstName": "Blaise",
            "lastName": "Pascal",
            "email": "blaise@example.org",
            "password": "pensees1670!"
        }),
    );
    let student_id = created
        .get("student")
        .and_then(|s| s.get("id"))
        .and_then(|v| v.as_str())
        .expect("student id")
        .to_string();

    // The edit path strips password input; trying to smuggle one in fails.
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "3",
        "students.update",
        json!({ "studentId": student_id, "password": "sneaky-overwrite" }),
    );
    assert_eq!(code, "validation_failed");

    let got = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.get",
        json!({ "studentId": student_id }),
    );
    let verify = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "auth.verify",
        json!({ "studentId": student_id, "password": "pensees1670!" }),
    );
    assert_eq!(verify.get("current"), Some(&json!(true)));
    assert!(got.get("student").is_some());

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "6",
        "students.update",
        json!({ "studentId": "no-such-id", "firstName": "Nobody" }),
    );
    assert_eq!(code, "not_found");
}

#[test]
fn create_validates_required_fields() {
    let workspace = temp_dir("studentd-create-validation");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "firstName": "NoLast", "email": "x@y.z", "password": "p@ssw0rd!!" }),
    );
    assert_eq!(code, "bad_params");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "firstName": "Bad", "lastName": "Email", "email": "not-an-address", "password": "p@ssw0rd!!" }),
    );
    assert_eq!(code, "validation_failed");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({ "firstName": "Empty", "lastName": "Password", "email": "e@p.example", "password": "" }),
    );
    assert_eq!(code, "validation_failed");

    let listed = request_ok(&mut stdin, &mut reader, "5", "students.list", json!({}));
    assert_eq!(
        listed
            .get("students")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0),
        "rejected creates must leave no partial state"
    );
}
