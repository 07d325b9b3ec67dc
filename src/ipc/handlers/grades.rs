use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_students_grades(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
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

    let mut stmt = match conn.prepare(
        "SELECT id, value, created_at FROM grades WHERE student_id = ? ORDER BY created_at, rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&student_id], |row| {
            let id: String = row.get(0)?;
            let value: f64 = row.get(1)?;
            let created_at: String = row.get(2)?;
            Ok((id, value, created_at))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    let grades = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let values: Vec<f64> = grades.iter().map(|(_, v, _)| *v).collect();
    let average = calc::grade_average(&values);

    let grades_json: Vec<serde_json::Value> = grades
        .into_iter()
        .map(|(id, value, created_at)| {
            json!({ "id": id, "value": value, "createdAt": created_at })
        })
        .collect();

    ok(
        &req.id,
        json!({ "grades": grades_json, "average": average }),
    )
}

fn handle_grades_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let value = match req.params.get("value").and_then(|v| v.as_f64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing or non-numeric value", None),
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

    let grade_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO grades(id, student_id, value, created_at) VALUES(?, ?, ?, ?)",
        (&grade_id, &student_id, value, &now),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "grades" })),
        );
    }

    ok(&req.id, json!({ "gradeId": grade_id, "value": value }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.grades" => Some(handle_students_grades(state, req)),
        "grades.add" => Some(handle_grades_add(state, req)),
        _ => None,
    }
}
