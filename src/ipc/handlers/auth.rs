use crate::auth;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;

/// Check a plaintext against a student's live credential and every entry in
/// the password history. The history entries were hashed under their own
/// identities, so each is verified independently through its PHC string.
fn handle_auth_verify(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let password = match req.params.get("password").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing password", None),
    };

    let current_hash: Option<String> = match conn
        .query_row(
            "SELECT password_hash FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(current_hash) = current_hash else {
        return err(&req.id, "not_found", "student not found", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT password_hash FROM previous_passwords
         WHERE student_id = ?
         ORDER BY created_at, rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let history_hashes = stmt
        .query_map([&student_id], |row| row.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let history_hashes = match history_hashes {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let current = auth::verify_password(&current_hash, &password);
    let history: Vec<bool> = history_hashes
        .iter()
        .map(|h| auth::verify_password(h, &password))
        .collect();

    ok(&req.id, json!({ "current": current, "history": history }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.verify" => Some(handle_auth_verify(state, req)),
        _ => None,
    }
}
