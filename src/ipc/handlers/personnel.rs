use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_bool, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::workflow::Role;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn parse_role(req: &Request, raw: Option<&str>) -> Result<Role, serde_json::Value> {
    match raw {
        None => Ok(Role::Teacher),
        Some(s) => Role::parse(s).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                "role must be one of: director, deputy, teacher",
                Some(json!({ "role": s })),
            )
        }),
    }
}

fn person_row_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let position: String = row.get(2)?;
    let role: String = row.get(3)?;
    let active: i64 = row.get(4)?;
    Ok(json!({
        "id": id,
        "name": name,
        "position": position,
        "role": role,
        "active": active != 0
    }))
}

fn handle_personnel_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let role_filter = optional_str(&req.params, "role");
    let query = optional_str(&req.params, "query").unwrap_or_default();
    let like = format!("%{}%", query);

    let mut stmt = match conn.prepare(
        "SELECT id, name, position, role, active
         FROM personnel
         WHERE (?1 = '' OR role = ?1)
           AND (?2 = '%%' OR name LIKE ?2 OR position LIKE ?2)
         ORDER BY name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map(
            (role_filter.as_deref().unwrap_or(""), &like),
            person_row_json,
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(personnel) => ok(&req.id, json!({ "personnel": personnel })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_personnel_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let position = optional_str(&req.params, "position").unwrap_or_default();
    let role = match parse_role(req, optional_str(&req.params, "role").as_deref()) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let active = optional_bool(&req.params, "active").unwrap_or(true);

    let personnel_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO personnel(id, name, position, role, active, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &personnel_id,
            &name,
            &position,
            role.as_str(),
            active as i64,
            &now,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "personnel" })),
        );
    }

    ok(
        &req.id,
        json!({ "personnelId": personnel_id, "name": name, "role": role.as_str() }),
    )
}

fn handle_personnel_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let personnel_id = match required_str(req, "personnelId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(patch) = req.params.get("patch") else {
        return err(&req.id, "bad_params", "missing patch", None);
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM personnel WHERE id = ?", [&personnel_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "personnel not found", None);
    }

    if let Some(role_raw) = optional_str(patch, "role") {
        let role = match parse_role(req, Some(&role_raw)) {
            Ok(r) => r,
            Err(resp) => return resp,
        };
        if let Err(e) = conn.execute(
            "UPDATE personnel SET role = ? WHERE id = ?",
            (role.as_str(), &personnel_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(name) = optional_str(patch, "name") {
        let name = name.trim().to_string();
        if name.is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
        if let Err(e) = conn.execute(
            "UPDATE personnel SET name = ? WHERE id = ?",
            (&name, &personnel_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(position) = optional_str(patch, "position") {
        if let Err(e) = conn.execute(
            "UPDATE personnel SET position = ? WHERE id = ?",
            (&position, &personnel_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(active) = optional_bool(patch, "active") {
        if let Err(e) = conn.execute(
            "UPDATE personnel SET active = ? WHERE id = ?",
            (active as i64, &personnel_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    let now = Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "UPDATE personnel SET updated_at = ? WHERE id = ?",
        (&now, &personnel_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "personnelId": personnel_id }))
}

fn count_references(
    conn: &Connection,
    sql: &str,
    personnel_id: &str,
) -> Result<i64, rusqlite::Error> {
    conn.query_row(sql, [personnel_id], |r| r.get(0))
}

fn handle_personnel_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let personnel_id = match required_str(req, "personnelId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM personnel WHERE id = ?", [&personnel_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "personnel not found", None);
    }

    // Refuse deletion while other rows still point at this person. Document
    // deletion deliberately has no such guard (registers drop without
    // cleaning assignments elsewhere), but removing a person out from under
    // live assignments would break the task queue.
    let checks = [
        (
            "SELECT COUNT(*) FROM documents WHERE assigned_to = ?",
            "documents.assignedTo",
        ),
        (
            "SELECT COUNT(*) FROM document_recipients WHERE personnel_id = ?",
            "documents.recipients",
        ),
        (
            "SELECT COUNT(*) FROM home_visits WHERE visitor_id = ?",
            "homeVisits.visitor",
        ),
        (
            "SELECT COUNT(*) FROM reports WHERE reporter_id = ?",
            "reports.reporter",
        ),
    ];
    for (sql, what) in checks {
        match count_references(conn, sql, &personnel_id) {
            Ok(0) => {}
            Ok(n) => {
                return err(
                    &req.id,
                    "in_use",
                    "personnel is still referenced",
                    Some(json!({ "by": what, "count": n })),
                )
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    if let Err(e) = conn.execute("DELETE FROM personnel WHERE id = ?", [&personnel_id]) {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "personnel.list" => Some(handle_personnel_list(state, req)),
        "personnel.create" => Some(handle_personnel_create(state, req)),
        "personnel.update" => Some(handle_personnel_update(state, req)),
        "personnel.delete" => Some(handle_personnel_delete(state, req)),
        _ => None,
    }
}
