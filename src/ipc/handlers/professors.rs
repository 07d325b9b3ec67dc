use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

/// Professors teaching the class level the student belongs to. A student
/// without a class level gets an empty list, not an error.
fn handle_students_professors(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let class_level_id: Option<Option<String>> = match conn
        .query_row(
            "SELECT class_level_id FROM students WHERE id = ?",
            [&student_id],
            |r| r.get::<_, Option<String>>(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let Some(class_level_id) = class_level_id else {
        return err(&req.id, "not_found", "student not found", None);
    };
    let Some(class_level_id) = class_level_id else {
        return ok(&req.id, json!({ "professors": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT p.id, p.last_name, p.first_name, p.email
         FROM professors p
         JOIN professor_class_levels pcl ON pcl.professor_id = p.id
         WHERE pcl.class_level_id = ?
         ORDER BY p.last_name, p.first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&class_level_id], |row| {
            let id: String = row.get(0)?;
            let last_name: String = row.get(1)?;
            let first_name: String = row.get(2)?;
            let email: String = row.get(3)?;
            Ok(json!({
                "id": id,
                "lastName": last_name,
                "firstName": first_name,
                "email": email
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(professors) => ok(&req.id, json!({ "professors": professors })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_class_levels_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classLevels": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT cl.id, cl.name,
           (SELECT COUNT(*) FROM students s WHERE s.class_level_id = cl.id) AS student_count
         FROM class_levels cl
         ORDER BY cl.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let student_count: i64 = row.get(2)?;
            Ok(json!({ "id": id, "name": name, "studentCount": student_count }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(levels) => ok(&req.id, json!({ "classLevels": levels })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_class_levels_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    let level_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO class_levels(id, name) VALUES(?, ?)",
        (&level_id, &name),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "class_levels" })),
        );
    }

    ok(&req.id, json!({ "classLevelId": level_id, "name": name }))
}

fn handle_professors_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "professors": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT p.id, p.last_name, p.first_name, p.email
         FROM professors p
         ORDER BY p.last_name, p.first_name",
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
            Ok(json!({
                "id": id,
                "lastName": last_name,
                "firstName": first_name,
                "email": email
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(professors) => ok(&req.id, json!({ "professors": professors })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_professors_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let first_name = match req.params.get("firstName").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing firstName", None),
    };
    let last_name = match req.params.get("lastName").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing lastName", None),
    };
    let email = match req.params.get("email").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing email", None),
    };

    let professor_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO professors(id, first_name, last_name, email) VALUES(?, ?, ?, ?)",
        (&professor_id, &first_name, &last_name, &email),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "professors" })),
        );
    }

    ok(&req.id, json!({ "professorId": professor_id }))
}

fn handle_professors_assign_level(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let professor_id = match req.params.get("professorId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing professorId", None),
    };
    let class_level_id = match req.params.get("classLevelId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classLevelId", None),
    };

    let professor_exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM professors WHERE id = ?",
            [&professor_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if professor_exists.is_none() {
        return err(&req.id, "not_found", "professor not found", None);
    }

    let level_exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM class_levels WHERE id = ?",
            [&class_level_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if level_exists.is_none() {
        return err(&req.id, "not_found", "class level not found", None);
    }

    // Many-to-many link; re-assigning the same pair is a no-op.
    if let Err(e) = conn.execute(
        "INSERT OR IGNORE INTO professor_class_levels(professor_id, class_level_id) VALUES(?, ?)",
        (&professor_id, &class_level_id),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "professor_class_levels" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.professors" => Some(handle_students_professors(state, req)),
        "classLevels.list" => Some(handle_class_levels_list(state, req)),
        "classLevels.create" => Some(handle_class_levels_create(state, req)),
        "professors.list" => Some(handle_professors_list(state, req)),
        "professors.create" => Some(handle_professors_create(state, req)),
        "professors.assignLevel" => Some(handle_professors_assign_level(state, req)),
        _ => None,
    }
}
