use crate::auth;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// Role tag assigned to every account created through this surface. Set once
/// at creation; nothing in this component ever rewrites it.
const STUDENT_ROLE: &str = "ROLE_STUDENT";

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.last_name, s.first_name, s.email, s.class_level_id
         FROM students s
         ORDER BY s.last_name, s.first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let last_name: String = row.get(1)?;
            let first_name: String = row.get(2)?;
            let email: String = row.get(3)?;
            let class_level_id: Option<String> = row.get(4)?;
            Ok(json!({
                "id": id,
                "lastName": last_name,
                "firstName": first_name,
                "email": email,
                "classLevelId": class_level_id
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    match student_json(conn, &student_id) {
        Ok(Some(student)) => ok(&req.id, json!({ "student": student })),
        Ok(None) => err(&req.id, "not_found", "student not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let first_name = match required_trimmed(req, "firstName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let last_name = match required_trimmed(req, "lastName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let email = match required_trimmed(req, "email") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if !email_is_plausible(&email) {
        return err(
            &req.id,
            "validation_failed",
            "email is not a valid address",
            Some(json!({ "field": "email" })),
        );
    }
    // The plaintext never gets trimmed: whitespace is significant in a password.
    let password = match req.params.get("password").and_then(|v| v.as_str()) {
        Some(v) if !v.is_empty() => v.to_string(),
        Some(_) => {
            return err(
                &req.id,
                "validation_failed",
                "password must not be empty",
                Some(json!({ "field": "password" })),
            )
        }
        None => return err(&req.id, "bad_params", "missing password", None),
    };

    let class_level_id = match optional_class_level(conn, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let student_id = Uuid::new_v4().to_string();
    let history_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    // Two independent hash computations over the one plaintext: the live
    // credential is salted under the student's identity, the history entry
    // under its own. The encoded strings differ; both verify the plaintext.
    let password_hash = match auth::hash_password(&password, &student_id) {
        Ok(h) => h,
        Err(e) => return err(&req.id, "hash_failed", e.to_string(), None),
    };
    let history_hash = match auth::hash_password(&password, &history_id) {
        Ok(h) => h,
        Err(e) => return err(&req.id, "hash_failed", e.to_string(), None),
    };

    let roles = json!([STUDENT_ROLE]).to_string();

    // Student and its first history row land together or not at all.
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "INSERT INTO students(id, first_name, last_name, email, roles, password_hash, class_level_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &first_name,
            &last_name,
            &email,
            &roles,
            &password_hash,
            &class_level_id,
            &now,
        ),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    if let Err(e) = tx.execute(
        "INSERT INTO previous_passwords(id, student_id, password_hash, created_at)
         VALUES(?, ?, ?, ?)",
        (&history_id, &student_id, &history_hash, &now),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "previous_passwords" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    match student_json(conn, &student_id) {
        Ok(Some(student)) => ok(&req.id, json!({ "student": student })),
        Ok(None) => err(&req.id, "db_query_failed", "created student vanished", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    // The edit path strips the password field before accepting input; a
    // credential can never be overwritten through the generic profile edit.
    if req.params.get("password").is_some() {
        return err(
            &req.id,
            "validation_failed",
            "password cannot be changed through profile update",
            Some(json!({ "field": "password" })),
        );
    }

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let first_name = match optional_trimmed(req, "firstName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let last_name = match optional_trimmed(req, "lastName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let email = match optional_trimmed(req, "email") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Some(e) = email.as_deref() {
        if !email_is_plausible(e) {
            return err(
                &req.id,
                "validation_failed",
                "email is not a valid address",
                Some(json!({ "field": "email" })),
            );
        }
    }

    // classLevelId distinguishes "absent" (keep) from explicit null (clear).
    let class_level_change: Option<Option<String>> = match req.params.get("classLevelId") {
        None => None,
        Some(serde_json::Value::Null) => Some(None),
        Some(v) => match v.as_str() {
            Some(s) => Some(Some(s.to_string())),
            None => return err(&req.id, "bad_params", "classLevelId must be a string or null", None),
        },
    };
    if let Some(Some(level_id)) = &class_level_change {
        match class_level_exists(conn, level_id) {
            Ok(true) => {}
            Ok(false) => return err(&req.id, "not_found", "class level not found", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let now = Utc::now().to_rfc3339();
    let result = conn.execute(
        "UPDATE students SET
            first_name = COALESCE(?, first_name),
            last_name = COALESCE(?, last_name),
            email = COALESCE(?, email),
            class_level_id = CASE WHEN ? THEN ? ELSE class_level_id END,
            updated_at = ?
         WHERE id = ?",
        (
            &first_name,
            &last_name,
            &email,
            class_level_change.is_some(),
            class_level_change.as_ref().and_then(|v| v.clone()),
            &now,
            &student_id,
        ),
    );
    if let Err(e) = result {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    match student_json(conn, &student_id) {
        Ok(Some(student)) => ok(&req.id, json!({ "student": student })),
        Ok(None) => err(&req.id, "not_found", "student not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let token = match req.params.get("token").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing token", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    // A stale or forged token does not raise: the request is acknowledged and
    // nothing happens, mirroring the original's unconditional redirect.
    if token != auth::delete_token(&student_id) {
        log::warn!("delete token mismatch for student {}", student_id);
        return ok(&req.id, json!({ "deleted": false }));
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete owned rows in dependency order (no ON DELETE CASCADE).
    if let Err(e) = tx.execute("DELETE FROM grades WHERE student_id = ?", [&student_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "grades" })),
        );
    }
    if let Err(e) = tx.execute(
        "DELETE FROM previous_passwords WHERE student_id = ?",
        [&student_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "previous_passwords" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "deleted": true }))
}

/// Full student view: profile, roles, hashes, ordered history, class level,
/// and the delete token a caller must echo back to destroy the record.
pub fn student_json(conn: &Connection, student_id: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let row = conn
        .query_row(
            "SELECT s.first_name, s.last_name, s.email, s.roles, s.password_hash,
                    s.class_level_id, cl.name, s.created_at, s.updated_at
             FROM students s
             LEFT JOIN class_levels cl ON cl.id = s.class_level_id
             WHERE s.id = ?",
            [student_id],
            |row| {
                let first_name: String = row.get(0)?;
                let last_name: String = row.get(1)?;
                let email: String = row.get(2)?;
                let roles: String = row.get(3)?;
                let password_hash: String = row.get(4)?;
                let class_level_id: Option<String> = row.get(5)?;
                let class_level_name: Option<String> = row.get(6)?;
                let created_at: String = row.get(7)?;
                let updated_at: Option<String> = row.get(8)?;
                Ok((
                    first_name,
                    last_name,
                    email,
                    roles,
                    password_hash,
                    class_level_id,
                    class_level_name,
                    created_at,
                    updated_at,
                ))
            },
        )
        .optional()?;

    let Some((
        first_name,
        last_name,
        email,
        roles_raw,
        password_hash,
        class_level_id,
        class_level_name,
        created_at,
        updated_at,
    )) = row
    else {
        return Ok(None);
    };

    let roles: serde_json::Value =
        serde_json::from_str(&roles_raw).unwrap_or_else(|_| json!([STUDENT_ROLE]));

    let mut stmt = conn.prepare(
        "SELECT id, password_hash, created_at
         FROM previous_passwords
         WHERE student_id = ?
         ORDER BY created_at, rowid",
    )?;
    let history = stmt
        .query_map([student_id], |row| {
            let id: String = row.get(0)?;
            let hash: String = row.get(1)?;
            let at: String = row.get(2)?;
            Ok(json!({ "id": id, "passwordHash": hash, "createdAt": at }))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let class_level = match (class_level_id, class_level_name) {
        (Some(id), Some(name)) => json!({ "id": id, "name": name }),
        _ => serde_json::Value::Null,
    };

    Ok(Some(json!({
        "id": student_id,
        "firstName": first_name,
        "lastName": last_name,
        "email": email,
        "roles": roles,
        "passwordHash": password_hash,
        "previousPasswords": history,
        "classLevel": class_level,
        "createdAt": created_at,
        "updatedAt": updated_at,
        "deleteToken": auth::delete_token(student_id),
    })))
}

pub fn class_level_exists(conn: &Connection, level_id: &str) -> anyhow::Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM class_levels WHERE id = ?", [level_id], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

fn optional_class_level(
    conn: &Connection,
    req: &Request,
) -> Result<Option<String>, serde_json::Value> {
    match req.params.get("classLevelId") {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => {
            let Some(level_id) = v.as_str() else {
                return Err(err(
                    &req.id,
                    "bad_params",
                    "classLevelId must be a string",
                    None,
                ));
            };
            match class_level_exists(conn, level_id) {
                Ok(true) => Ok(Some(level_id.to_string())),
                Ok(false) => Err(err(&req.id, "not_found", "class level not found", None)),
                Err(e) => Err(err(&req.id, "db_query_failed", e.to_string(), None)),
            }
        }
    }
}

fn required_trimmed(req: &Request, field: &str) -> Result<String, serde_json::Value> {
    match req.params.get(field).and_then(|v| v.as_str()) {
        Some(v) => {
            let v = v.trim().to_string();
            if v.is_empty() {
                Err(err(
                    &req.id,
                    "validation_failed",
                    format!("{} must not be empty", field),
                    Some(json!({ "field": field })),
                ))
            } else {
                Ok(v)
            }
        }
        None => Err(err(
            &req.id,
            "bad_params",
            format!("missing {}", field),
            None,
        )),
    }
}

fn optional_trimmed(req: &Request, field: &str) -> Result<Option<String>, serde_json::Value> {
    match req.params.get(field) {
        None => Ok(None),
        Some(v) => {
            let Some(s) = v.as_str() else {
                return Err(err(
                    &req.id,
                    "bad_params",
                    format!("{} must be a string", field),
                    None,
                ));
            };
            let s = s.trim().to_string();
            if s.is_empty() {
                Err(err(
                    &req.id,
                    "validation_failed",
                    format!("{} must not be empty", field),
                    Some(json!({ "field": field })),
                ))
            } else {
                Ok(Some(s))
            }
        }
    }
}

fn email_is_plausible(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
