use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_f64, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn photo_urls_json(raw: &str) -> serde_json::Value {
    // Stored as a JSON array of opaque references; tolerate old rows that
    // hold malformed text by reporting an empty list.
    serde_json::from_str(raw).unwrap_or_else(|_| json!([]))
}

fn visit_row_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let photos_raw: String = row.get(5)?;
    Ok(json!({
        "id": row.get::<_, String>(0)?,
        "studentId": row.get::<_, String>(1)?,
        "visitDate": row.get::<_, String>(2)?,
        "visitorId": row.get::<_, Option<String>>(3)?,
        "notes": row.get::<_, String>(4)?,
        "photoUrls": photo_urls_json(&photos_raw),
        "lat": row.get::<_, Option<f64>>(6)?,
        "lng": row.get::<_, Option<f64>>(7)?,
    }))
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = optional_str(&req.params, "studentId").unwrap_or_default();

    let mut stmt = match conn.prepare(
        "SELECT id, student_id, visit_date, visitor_id, notes, photo_urls, lat, lng
         FROM home_visits
         WHERE (?1 = '' OR student_id = ?1)
         ORDER BY visit_date DESC, id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&student_id], visit_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(visits) => ok(&req.id, json!({ "visits": visits })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let visit_date = match crate::ipc::helpers::required_date(req, "visitDate") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let student_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if student_exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let visitor_id = optional_str(&req.params, "visitorId");
    if let Some(vid) = &visitor_id {
        let visitor_exists: Option<i64> = match conn
            .query_row("SELECT 1 FROM personnel WHERE id = ?", [vid], |r| r.get(0))
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if visitor_exists.is_none() {
            return err(&req.id, "not_found", "visitor personnel not found", None);
        }
    }

    let photo_urls = req
        .params
        .get("photoUrls")
        .filter(|v| v.is_array())
        .cloned()
        .unwrap_or_else(|| json!([]));

    let visit_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO home_visits(id, student_id, visit_date, visitor_id, notes,
                                 photo_urls, lat, lng)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &visit_id,
            &student_id,
            &visit_date,
            visitor_id,
            optional_str(&req.params, "notes").unwrap_or_default(),
            photo_urls.to_string(),
            optional_f64(&req.params, "lat"),
            optional_f64(&req.params, "lng"),
        ],
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "home_visits" })),
        );
    }

    ok(&req.id, json!({ "visitId": visit_id }))
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let visit_id = match required_str(req, "visitId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(patch) = req.params.get("patch") else {
        return err(&req.id, "bad_params", "missing patch", None);
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM home_visits WHERE id = ?", [&visit_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "home visit not found", None);
    }

    if let Some(date) = optional_str(patch, "visitDate") {
        if chrono::NaiveDate::parse_from_str(&date, "%Y-%m-%d").is_err() {
            return err(&req.id, "bad_params", "visitDate must be YYYY-MM-DD", None);
        }
        if let Err(e) = conn.execute(
            "UPDATE home_visits SET visit_date = ? WHERE id = ?",
            (&date, &visit_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(notes) = optional_str(patch, "notes") {
        if let Err(e) = conn.execute(
            "UPDATE home_visits SET notes = ? WHERE id = ?",
            (&notes, &visit_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(photos) = patch.get("photoUrls").filter(|v| v.is_array()) {
        if let Err(e) = conn.execute(
            "UPDATE home_visits SET photo_urls = ? WHERE id = ?",
            (photos.to_string(), &visit_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    for (key, column) in [("lat", "lat"), ("lng", "lng")] {
        if let Some(value) = optional_f64(patch, key) {
            let sql = format!("UPDATE home_visits SET {} = ? WHERE id = ?", column);
            if let Err(e) = conn.execute(&sql, (value, &visit_id)) {
                return err(&req.id, "db_update_failed", e.to_string(), None);
            }
        }
    }

    ok(&req.id, json!({ "visitId": visit_id }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let visit_id = match required_str(req, "visitId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match conn.execute("DELETE FROM home_visits WHERE id = ?", [&visit_id]) {
        Ok(0) => err(&req.id, "not_found", "home visit not found", None),
        Ok(_) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "homevisits.list" => Some(handle_list(state, req)),
        "homevisits.create" => Some(handle_create(state, req)),
        "homevisits.update" => Some(handle_update(state, req)),
        "homevisits.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
