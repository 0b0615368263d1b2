use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let date = optional_str(&req.params, "date").unwrap_or_default();
    let category = optional_str(&req.params, "category").unwrap_or_default();

    let mut stmt = match conn.prepare(
        "SELECT id, report_date, category, detail, reporter_id, created_at
         FROM reports
         WHERE (?1 = '' OR report_date = ?1)
           AND (?2 = '' OR category = ?2)
         ORDER BY report_date DESC, created_at DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map((&date, &category), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "reportDate": r.get::<_, String>(1)?,
                "category": r.get::<_, String>(2)?,
                "detail": r.get::<_, String>(3)?,
                "reporterId": r.get::<_, Option<String>>(4)?,
                "createdAt": r.get::<_, Option<String>>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(reports) => ok(&req.id, json!({ "reports": reports })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let report_date = match crate::ipc::helpers::required_date(req, "reportDate") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let category = match required_str(req, "category") {
        Ok(v) => v.trim().to_string(),
        Err(resp) => return resp,
    };
    if category.is_empty() {
        return err(&req.id, "bad_params", "category must not be empty", None);
    }

    let reporter_id = optional_str(&req.params, "reporterId");
    if let Some(rid) = &reporter_id {
        let reporter_exists: Option<i64> = match conn
            .query_row("SELECT 1 FROM personnel WHERE id = ?", [rid], |r| r.get(0))
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if reporter_exists.is_none() {
            return err(&req.id, "not_found", "reporter personnel not found", None);
        }
    }

    let report_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO reports(id, report_date, category, detail, reporter_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &report_id,
            &report_date,
            &category,
            optional_str(&req.params, "detail").unwrap_or_default(),
            reporter_id,
            &now,
        ],
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "reports" })),
        );
    }

    ok(&req.id, json!({ "reportId": report_id }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let report_id = match required_str(req, "reportId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match conn.execute("DELETE FROM reports WHERE id = ?", [&report_id]) {
        Ok(0) => err(&req.id, "not_found", "report not found", None),
        Ok(_) => ok(&req.id, json!({ "deleted": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.list" => Some(handle_list(state, req)),
        "reports.create" => Some(handle_create(state, req)),
        "reports.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
