use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_date, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

const CODES: [&str; 5] = ["P", "A", "S", "L", "T"];

fn parse_optional_code(v: Option<&serde_json::Value>) -> Result<Option<String>, serde_json::Value> {
    let Some(v) = v else { return Ok(None) };
    if v.is_null() {
        return Ok(None);
    }
    let Some(s) = v.as_str() else {
        return Err(json!({ "message": "code must be string or null" }));
    };
    let t = s.trim().to_ascii_uppercase();
    if t.is_empty() {
        return Ok(None);
    }
    if !CODES.contains(&t.as_str()) {
        return Err(json!({ "message": "code must be one of: P, A, S, L, T", "code": s }));
    }
    Ok(Some(t))
}

fn set_cell(
    conn: &Connection,
    date: &str,
    student_id: &str,
    code: Option<&str>,
) -> Result<(), rusqlite::Error> {
    match code {
        // Clearing a cell removes the row rather than storing a blank.
        None => {
            conn.execute(
                "DELETE FROM attendance_days WHERE attendance_date = ? AND student_id = ?",
                (date, student_id),
            )?;
        }
        Some(c) => {
            conn.execute(
                "INSERT INTO attendance_days(attendance_date, student_id, code)
                 VALUES(?, ?, ?)
                 ON CONFLICT(attendance_date, student_id) DO UPDATE SET
                   code = excluded.code",
                (date, student_id, c),
            )?;
        }
    }
    Ok(())
}

fn handle_day_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let date = match required_date(req, "date") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, name, class_level, class_room, active
         FROM students
         WHERE active = 1
         ORDER BY class_level, class_room, name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let roster = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, Option<String>>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let roster = match roster {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut by_student: HashMap<String, String> = HashMap::new();
    let mut stmt = match conn.prepare(
        "SELECT student_id, code FROM attendance_days WHERE attendance_date = ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&date], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(rows) => {
            for (student_id, code) in rows {
                by_student.insert(student_id, code);
            }
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let rows_json: Vec<serde_json::Value> = roster
        .iter()
        .map(|(id, name, class_level, class_room)| {
            json!({
                "studentId": id,
                "name": name,
                "classLevel": class_level,
                "classRoom": class_room,
                "code": by_student.get(id),
            })
        })
        .collect();

    ok(&req.id, json!({ "date": date, "rows": rows_json }))
}

fn handle_set_student_day(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let date = match required_date(req, "date") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let code = match parse_optional_code(req.params.get("code")) {
        Ok(v) => v,
        Err(details) => return err(&req.id, "bad_params", "invalid code", Some(details)),
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

    if let Err(e) = set_cell(conn, &date, &student_id, code.as_deref()) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "attendance_days" })),
        );
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_bulk_stamp_day(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let date = match required_date(req, "date") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let code = match parse_optional_code(req.params.get("code")) {
        Ok(v) => v,
        Err(details) => return err(&req.id, "bad_params", "invalid code", Some(details)),
    };
    let Some(student_ids_json) = req.params.get("studentIds").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing studentIds", None);
    };
    let student_ids: Vec<String> = student_ids_json
        .iter()
        .filter_map(|v| v.as_str().map(|s| s.to_string()))
        .collect();

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for student_id in &student_ids {
        let exists = match tx
            .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
                r.get::<_, i64>(0)
            })
            .optional()
        {
            Ok(v) => v.is_some(),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if !exists {
            continue;
        }
        if let Err(e) = set_cell(&tx, &date, student_id, code.as_deref()) {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "attendance_days" })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.dayOpen" => Some(handle_day_open(state, req)),
        "attendance.setStudentDay" => Some(handle_set_student_day(state, req)),
        "attendance.bulkStampDay" => Some(handle_bulk_stamp_day(state, req)),
        _ => None,
    }
}
