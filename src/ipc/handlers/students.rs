use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_bool, optional_f64, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn student_row_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let student_no: Option<String> = row.get(1)?;
    let name: String = row.get(2)?;
    let class_level: Option<String> = row.get(3)?;
    let class_room: Option<String> = row.get(4)?;
    let guardian_name: Option<String> = row.get(5)?;
    let guardian_phone: Option<String> = row.get(6)?;
    let address: Option<String> = row.get(7)?;
    let lat: Option<f64> = row.get(8)?;
    let lng: Option<f64> = row.get(9)?;
    let active: i64 = row.get(10)?;
    Ok(json!({
        "id": id,
        "studentNo": student_no,
        "name": name,
        "classLevel": class_level,
        "classRoom": class_room,
        "guardianName": guardian_name,
        "guardianPhone": guardian_phone,
        "address": address,
        "lat": lat,
        "lng": lng,
        "active": active != 0
    }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let class_level = optional_str(&req.params, "classLevel").unwrap_or_default();
    let query = optional_str(&req.params, "query").unwrap_or_default();
    let like = format!("%{}%", query);

    let mut stmt = match conn.prepare(
        "SELECT id, student_no, name, class_level, class_room, guardian_name,
                guardian_phone, address, lat, lng, active
         FROM students
         WHERE (?1 = '' OR class_level = ?1)
           AND (?2 = '%%' OR name LIKE ?2 OR student_no LIKE ?2)
         ORDER BY class_level, class_room, name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map((&class_level, &like), student_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let name = match required_str(req, "name") {
        Ok(v) => v.trim().to_string(),
        Err(resp) => return resp,
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    let student_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, student_no, name, class_level, class_room,
                              guardian_name, guardian_phone, address, lat, lng,
                              active, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &student_id,
            optional_str(&req.params, "studentNo"),
            &name,
            optional_str(&req.params, "classLevel"),
            optional_str(&req.params, "classRoom"),
            optional_str(&req.params, "guardianName"),
            optional_str(&req.params, "guardianPhone"),
            optional_str(&req.params, "address"),
            optional_f64(&req.params, "lat"),
            optional_f64(&req.params, "lng"),
            optional_bool(&req.params, "active").unwrap_or(true) as i64,
            &now,
        ],
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "studentId": student_id, "name": name }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(patch) = req.params.get("patch") else {
        return err(&req.id, "bad_params", "missing patch", None);
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

    let text_fields = [
        ("studentNo", "student_no"),
        ("name", "name"),
        ("classLevel", "class_level"),
        ("classRoom", "class_room"),
        ("guardianName", "guardian_name"),
        ("guardianPhone", "guardian_phone"),
        ("address", "address"),
    ];
    for (key, column) in text_fields {
        if let Some(value) = optional_str(patch, key) {
            if key == "name" && value.trim().is_empty() {
                return err(&req.id, "bad_params", "name must not be empty", None);
            }
            let sql = format!("UPDATE students SET {} = ? WHERE id = ?", column);
            if let Err(e) = conn.execute(&sql, (&value, &student_id)) {
                return err(&req.id, "db_update_failed", e.to_string(), None);
            }
        }
    }
    for (key, column) in [("lat", "lat"), ("lng", "lng")] {
        if let Some(value) = optional_f64(patch, key) {
            let sql = format!("UPDATE students SET {} = ? WHERE id = ?", column);
            if let Err(e) = conn.execute(&sql, (value, &student_id)) {
                return err(&req.id, "db_update_failed", e.to_string(), None);
            }
        }
    }
    if let Some(active) = optional_bool(patch, "active") {
        if let Err(e) = conn.execute(
            "UPDATE students SET active = ? WHERE id = ?",
            (active as i64, &student_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    let now = Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "UPDATE students SET updated_at = ? WHERE id = ?",
        (&now, &student_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
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

    let visits: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM home_visits WHERE student_id = ?",
        [&student_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if visits > 0 {
        return err(
            &req.id,
            "in_use",
            "student has home visit records",
            Some(json!({ "homeVisits": visits })),
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    // Attendance rows go with the student; no ON DELETE CASCADE in the schema.
    if let Err(e) = tx.execute(
        "DELETE FROM attendance_days WHERE student_id = ?",
        [&student_id],
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    if let Err(e) = tx.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        let _ = tx.rollback();
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
