use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_date};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::collections::BTreeMap;

fn counts_by_key(
    conn: &Connection,
    sql: &str,
    bind: &str,
) -> Result<BTreeMap<String, i64>, rusqlite::Error> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([bind], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
    })?;
    let mut out = BTreeMap::new();
    for row in rows {
        let (key, count) = row?;
        out.insert(key, count);
    }
    Ok(out)
}

fn document_status_counts(conn: &Connection) -> Result<BTreeMap<String, i64>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM documents GROUP BY status")?;
    let rows = stmt.query_map([], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
    })?;
    let mut out = BTreeMap::new();
    for row in rows {
        let (key, count) = row?;
        out.insert(key, count);
    }
    Ok(out)
}

/// Daily aggregates, recomputed from the full data set on every call. Small
/// data volumes make an incremental index unnecessary.
fn handle_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let date = match required_date(req, "date") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let roster_size: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM students WHERE active = 1",
        [],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let attendance = match counts_by_key(
        conn,
        "SELECT code, COUNT(*) FROM attendance_days
         WHERE attendance_date = ? GROUP BY code",
        &date,
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let recorded: i64 = attendance.values().sum();

    let reports = match counts_by_key(
        conn,
        "SELECT category, COUNT(*) FROM reports
         WHERE report_date = ? GROUP BY category",
        &date,
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Document registers are not date-scoped; the dashboard shows the live
    // status breakdown across all three registers.
    let documents = match document_status_counts(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let home_visits: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM home_visits WHERE visit_date = ?",
        [&date],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "date": date,
            "attendance": {
                "rosterSize": roster_size,
                "recorded": recorded,
                "unrecorded": roster_size - recorded,
                "byCode": attendance,
            },
            "reportsByCategory": reports,
            "documentsByStatus": documents,
            "homeVisits": home_visits,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.summary" => Some(handle_summary(state, req)),
        _ => None,
    }
}
