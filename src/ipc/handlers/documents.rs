use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_bool, optional_f64, optional_i64, optional_str};
use crate::ipc::types::{AppState, Request};
use crate::workflow::{apply_signing, Decision, Role, SigningRefusal, Status};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn db_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    }
}

fn bad_params(message: impl Into<String>) -> HandlerErr {
    HandlerErr {
        code: "bad_params",
        message: message.into(),
        details: None,
    }
}

const DOC_TYPES: [&str; 3] = ["incoming", "order", "outgoing"];

fn require_doc_type(params: &serde_json::Value) -> Result<String, HandlerErr> {
    let raw = params
        .get("docType")
        .and_then(|v| v.as_str())
        .ok_or_else(|| bad_params("missing docType"))?;
    if !DOC_TYPES.contains(&raw) {
        return Err(bad_params("docType must be one of: incoming, order, outgoing"));
    }
    Ok(raw.to_string())
}

fn require_document_id(params: &serde_json::Value) -> Result<i64, HandlerErr> {
    params
        .get("documentId")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| bad_params("missing documentId"))
}

#[derive(Debug, Clone)]
struct PersonRow {
    id: String,
    name: String,
    position: String,
    role: Role,
}

fn load_person(conn: &Connection, personnel_id: &str) -> Result<Option<PersonRow>, HandlerErr> {
    conn.query_row(
        "SELECT id, name, position, role FROM personnel WHERE id = ? AND active = 1",
        [personnel_id],
        |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        },
    )
    .optional()
    .map_err(db_err)?
    .map(|(id, name, position, role_raw)| {
        let role = Role::parse(&role_raw).ok_or_else(|| HandlerErr {
            code: "bad_state",
            message: format!("personnel {} has unknown role {}", id, role_raw),
            details: None,
        })?;
        Ok(PersonRow {
            id,
            name,
            position,
            role,
        })
    })
    .transpose()
}

#[derive(Debug, Clone)]
struct DocRow {
    id: i64,
    status: Status,
}

fn load_doc(conn: &Connection, document_id: i64) -> Result<Option<DocRow>, HandlerErr> {
    conn.query_row(
        "SELECT id, status FROM documents WHERE id = ?",
        [document_id],
        |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)),
    )
    .optional()
    .map_err(db_err)?
    .map(|(id, status_raw)| {
        let status = Status::parse(&status_raw).ok_or_else(|| HandlerErr {
            code: "bad_state",
            message: format!("document {} has unknown status {}", id, status_raw),
            details: None,
        })?;
        Ok(DocRow { id, status })
    })
    .transpose()
}

/// Document ids are creation timestamps in milliseconds; bump past collisions
/// so two documents created within the same millisecond stay distinct and
/// ordering still tracks recency.
fn next_document_id(conn: &Connection) -> Result<i64, HandlerErr> {
    let mut candidate = Utc::now().timestamp_millis();
    loop {
        let taken: Option<i64> = conn
            .query_row("SELECT 1 FROM documents WHERE id = ?", [candidate], |r| {
                r.get(0)
            })
            .optional()
            .map_err(db_err)?;
        if taken.is_none() {
            return Ok(candidate);
        }
        candidate += 1;
    }
}

fn document_json(conn: &Connection, document_id: i64) -> Result<serde_json::Value, HandlerErr> {
    let mut doc = conn
        .query_row(
            "SELECT id, doc_type, status, doc_no, title, from_party, to_party,
                    doc_date, file_url, assigned_to, total_pages, signatory_page,
                    stamp_scale, show_stamp, created_at
             FROM documents WHERE id = ?",
            [document_id],
            |r| {
                let doc_type: String = r.get(1)?;
                let show_stamp: i64 = r.get(13)?;
                Ok(json!({
                    "id": r.get::<_, i64>(0)?,
                    "docType": doc_type.clone(),
                    "status": r.get::<_, String>(2)?,
                    "docNo": r.get::<_, Option<String>>(3)?,
                    "title": r.get::<_, String>(4)?,
                    "fromParty": r.get::<_, Option<String>>(5)?,
                    "toParty": r.get::<_, Option<String>>(6)?,
                    "docDate": r.get::<_, Option<String>>(7)?,
                    "fileUrl": r.get::<_, Option<String>>(8)?,
                    "assignedTo": r.get::<_, Option<String>>(9)?,
                    "totalPages": r.get::<_, i64>(10)?,
                    "signatoryPage": r.get::<_, i64>(11)?,
                    "stampScale": r.get::<_, f64>(12)?,
                    // Only incoming mail carries a receive stamp.
                    "showStamp": doc_type == "incoming" && show_stamp != 0,
                    "createdAt": r.get::<_, Option<String>>(14)?,
                }))
            },
        )
        .map_err(db_err)?;

    let mut stmt = conn
        .prepare(
            "SELECT seq, signature, comment, signer_id, signer_name, signer_position,
                    signed_at, pos_x, pos_y, scale, assigned_name
             FROM endorsements WHERE document_id = ? ORDER BY seq",
        )
        .map_err(db_err)?;
    let endorsements = stmt
        .query_map([document_id], |r| {
            Ok(json!({
                "seq": r.get::<_, i64>(0)?,
                "signature": r.get::<_, String>(1)?,
                "comment": r.get::<_, String>(2)?,
                "signerId": r.get::<_, String>(3)?,
                "signerName": r.get::<_, String>(4)?,
                "signerPosition": r.get::<_, String>(5)?,
                "signedAt": r.get::<_, String>(6)?,
                "posX": r.get::<_, f64>(7)?,
                "posY": r.get::<_, f64>(8)?,
                "scale": r.get::<_, f64>(9)?,
                "assignedName": r.get::<_, Option<String>>(10)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut stmt = conn
        .prepare(
            "SELECT personnel_id FROM document_recipients
             WHERE document_id = ? ORDER BY personnel_id",
        )
        .map_err(db_err)?;
    let recipients = stmt
        .query_map([document_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    doc["endorsements"] = json!(endorsements);
    doc["recipients"] = json!(recipients);
    Ok(doc)
}

fn summary_row_json(row: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": row.get::<_, i64>(0)?,
        "docType": row.get::<_, String>(1)?,
        "status": row.get::<_, String>(2)?,
        "docNo": row.get::<_, Option<String>>(3)?,
        "title": row.get::<_, String>(4)?,
        "fromParty": row.get::<_, Option<String>>(5)?,
        "docDate": row.get::<_, Option<String>>(6)?,
        "assignedTo": row.get::<_, Option<String>>(7)?,
        "endorsementCount": row.get::<_, i64>(8)?,
    }))
}

const SUMMARY_SELECT: &str = "SELECT
       d.id, d.doc_type, d.status, d.doc_no, d.title, d.from_party, d.doc_date,
       d.assigned_to,
       (SELECT COUNT(*) FROM endorsements e WHERE e.document_id = d.id)
     FROM documents d";

fn documents_register(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let doc_type = require_doc_type(params)?;
    let sql = format!("{} WHERE d.doc_type = ? ORDER BY d.id DESC", SUMMARY_SELECT);
    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let documents = stmt
        .query_map([&doc_type], summary_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(json!({ "documents": documents }))
}

fn documents_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let doc_type = require_doc_type(params)?;
    let title = params
        .get("title")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| bad_params("missing title"))?;
    if title.is_empty() {
        return Err(bad_params("title must not be empty"));
    }
    let status = match optional_str(params, "status") {
        None => Status::Proposed,
        Some(raw) => Status::parse(&raw).ok_or_else(|| {
            bad_params("status must be one of: draft, proposed, endorsed, delegated, distributed")
        })?,
    };
    let show_stamp = doc_type == "incoming" && optional_bool(params, "showStamp").unwrap_or(false);

    let document_id = next_document_id(conn)?;
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO documents(id, doc_type, status, doc_no, title, from_party,
                               to_party, doc_date, file_url, total_pages,
                               signatory_page, stamp_scale, show_stamp, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            document_id,
            &doc_type,
            status.as_str(),
            optional_str(params, "docNo"),
            &title,
            optional_str(params, "fromParty"),
            optional_str(params, "toParty"),
            optional_str(params, "docDate"),
            optional_str(params, "fileUrl"),
            optional_i64(params, "totalPages").unwrap_or(1),
            optional_i64(params, "signatoryPage").unwrap_or(1),
            optional_f64(params, "stampScale").unwrap_or(1.0),
            show_stamp as i64,
            &now,
        ],
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "documents" })),
    })?;

    document_json(conn, document_id)
}

fn documents_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let document_id = require_document_id(params)?;
    if load_doc(conn, document_id)?.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "document not found".to_string(),
            details: None,
        });
    }
    document_json(conn, document_id)
}

/// Full-edit escape hatch: register fields, presentation metadata and status
/// may be overwritten directly, bypassing the signing transition. Type,
/// endorsements and recipients are not editable here.
fn documents_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let document_id = require_document_id(params)?;
    let patch = params.get("patch").ok_or_else(|| bad_params("missing patch"))?;
    if patch.get("docType").is_some() {
        return Err(bad_params("docType is immutable"));
    }
    if patch.get("endorsements").is_some() || patch.get("recipients").is_some() {
        return Err(bad_params("endorsements and recipients are append-only"));
    }

    let doc = load_doc(conn, document_id)?.ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "document not found".to_string(),
        details: None,
    })?;

    let doc_type: String = conn
        .query_row(
            "SELECT doc_type FROM documents WHERE id = ?",
            [document_id],
            |r| r.get(0),
        )
        .map_err(db_err)?;

    if let Some(raw) = optional_str(patch, "status") {
        let status = Status::parse(&raw).ok_or_else(|| {
            bad_params("status must be one of: draft, proposed, endorsed, delegated, distributed")
        })?;
        conn.execute(
            "UPDATE documents SET status = ? WHERE id = ?",
            (status.as_str(), doc.id),
        )
        .map_err(db_err)?;
    }
    let text_fields = [
        ("docNo", "doc_no"),
        ("title", "title"),
        ("fromParty", "from_party"),
        ("toParty", "to_party"),
        ("docDate", "doc_date"),
        ("fileUrl", "file_url"),
    ];
    for (key, column) in text_fields {
        if let Some(value) = optional_str(patch, key) {
            if key == "title" && value.trim().is_empty() {
                return Err(bad_params("title must not be empty"));
            }
            let sql = format!("UPDATE documents SET {} = ? WHERE id = ?", column);
            conn.execute(&sql, (&value, doc.id)).map_err(db_err)?;
        }
    }
    for (key, column) in [("totalPages", "total_pages"), ("signatoryPage", "signatory_page")] {
        if let Some(value) = optional_i64(patch, key) {
            let sql = format!("UPDATE documents SET {} = ? WHERE id = ?", column);
            conn.execute(&sql, (value, doc.id)).map_err(db_err)?;
        }
    }
    if let Some(value) = optional_f64(patch, "stampScale") {
        conn.execute(
            "UPDATE documents SET stamp_scale = ? WHERE id = ?",
            (value, doc.id),
        )
        .map_err(db_err)?;
    }
    if let Some(value) = optional_bool(patch, "showStamp") {
        let effective = doc_type == "incoming" && value;
        conn.execute(
            "UPDATE documents SET show_stamp = ? WHERE id = ?",
            (effective as i64, doc.id),
        )
        .map_err(db_err)?;
    }

    document_json(conn, document_id)
}

fn documents_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let ids: Vec<i64> = params
        .get("documentIds")
        .and_then(|v| v.as_array())
        .ok_or_else(|| bad_params("missing documentIds"))?
        .iter()
        .filter_map(|v| v.as_i64())
        .collect();

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    let mut deleted = 0i64;
    for id in ids {
        // Each document takes its own endorsement and recipient rows with it.
        // There is deliberately no cross-document cleanup of assignments.
        tx.execute("DELETE FROM endorsements WHERE document_id = ?", [id])
            .map_err(db_err)?;
        tx.execute(
            "DELETE FROM document_recipients WHERE document_id = ?",
            [id],
        )
        .map_err(db_err)?;
        deleted += tx
            .execute("DELETE FROM documents WHERE id = ?", [id])
            .map_err(db_err)? as i64;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;
    Ok(json!({ "deleted": deleted }))
}

fn clamp_percent(v: f64) -> f64 {
    v.clamp(0.0, 100.0)
}

fn documents_sign(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let document_id = require_document_id(params)?;
    let actor_id = optional_str(params, "actorId").ok_or_else(|| bad_params("missing actorId"))?;
    let signature =
        optional_str(params, "signature").ok_or_else(|| bad_params("missing signature"))?;
    let comment = optional_str(params, "comment").unwrap_or_default();
    let pos_x = clamp_percent(optional_f64(params, "posX").ok_or_else(|| bad_params("missing posX"))?);
    let pos_y = clamp_percent(optional_f64(params, "posY").ok_or_else(|| bad_params("missing posY"))?);
    let scale = optional_f64(params, "scale").unwrap_or(1.0);
    let delegate_to = optional_str(params, "delegateToId");

    let doc = load_doc(conn, document_id)?.ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "document not found".to_string(),
        details: None,
    })?;
    let actor = load_person(conn, &actor_id)?.ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "acting personnel not found".to_string(),
        details: Some(json!({ "actorId": actor_id })),
    })?;
    let delegate = match &delegate_to {
        None => None,
        Some(id) => Some(load_person(conn, id)?.ok_or_else(|| HandlerErr {
            code: "not_found",
            message: "delegate personnel not found".to_string(),
            details: Some(json!({ "delegateToId": id })),
        })?),
    };

    let decision = if delegate.is_some() {
        Decision::Delegate
    } else {
        Decision::Keep
    };
    let outcome = apply_signing(doc.status, actor.role, decision).map_err(|refusal| match refusal
    {
        SigningRefusal::NotDirector => HandlerErr {
            code: "not_director",
            message: "a proposed document must be endorsed or delegated by the director first"
                .to_string(),
            details: Some(json!({ "status": doc.status.as_str() })),
        },
    })?;

    // All side effects of one signing action land in a single transaction:
    // endorsement append, recipient union, assignment, status.
    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    let seq: i64 = tx
        .query_row(
            "SELECT COUNT(*) FROM endorsements WHERE document_id = ?",
            [doc.id],
            |r| r.get(0),
        )
        .map_err(db_err)?;
    let signed_at = Utc::now().to_rfc3339();
    tx.execute(
        "INSERT INTO endorsements(document_id, seq, signature, comment, signer_id,
                                  signer_name, signer_position, signed_at,
                                  pos_x, pos_y, scale, assigned_name)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            doc.id,
            seq,
            &signature,
            &comment,
            &actor.id,
            &actor.name,
            &actor.position,
            &signed_at,
            pos_x,
            pos_y,
            scale,
            delegate.as_ref().map(|d| d.name.clone()),
        ],
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "endorsements" })),
    })?;
    tx.execute(
        "INSERT OR IGNORE INTO document_recipients(document_id, personnel_id) VALUES(?, ?)",
        rusqlite::params![doc.id, &actor.id],
    )
    .map_err(db_err)?;
    let next_assignee = if outcome.retains_assignee {
        delegate.as_ref().map(|d| d.id.clone())
    } else {
        None
    };
    tx.execute(
        "UPDATE documents SET status = ?, assigned_to = ? WHERE id = ?",
        rusqlite::params![outcome.status.as_str(), next_assignee, doc.id],
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "documents" })),
    })?;
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    document_json(conn, doc.id)
}

fn documents_inbox(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user_id = optional_str(params, "userId").ok_or_else(|| bad_params("missing userId"))?;
    let sql = format!(
        "{} JOIN document_recipients r ON r.document_id = d.id
         WHERE r.personnel_id = ? ORDER BY d.id DESC",
        SUMMARY_SELECT
    );
    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let documents = stmt
        .query_map([&user_id], summary_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(json!({ "documents": documents }))
}

fn documents_tasks(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user_id = optional_str(params, "userId").ok_or_else(|| bad_params("missing userId"))?;
    let user = load_person(conn, &user_id)?.ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "personnel not found".to_string(),
        details: Some(json!({ "userId": user_id })),
    })?;

    // The director works the proposal queue; everyone else sees what has been
    // delegated to them. Recomputed from the full set on every call.
    let (sql, bind): (String, Vec<String>) = if user.role == Role::Director {
        (
            format!(
                "{} WHERE d.status = 'proposed' ORDER BY d.id DESC",
                SUMMARY_SELECT
            ),
            vec![],
        )
    } else {
        (
            format!(
                "{} WHERE d.status = 'delegated' AND d.assigned_to = ? ORDER BY d.id DESC",
                SUMMARY_SELECT
            ),
            vec![user.id.clone()],
        )
    };
    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let documents = stmt
        .query_map(rusqlite::params_from_iter(bind.iter()), summary_row_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(json!({ "documents": documents, "role": user.role.as_str() }))
}

fn dispatch(
    state: &mut AppState,
    req: &Request,
    f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "documents.register" => Some(dispatch(state, req, documents_register)),
        "documents.create" => Some(dispatch(state, req, documents_create)),
        "documents.get" => Some(dispatch(state, req, documents_get)),
        "documents.update" => Some(dispatch(state, req, documents_update)),
        "documents.delete" => Some(dispatch(state, req, documents_delete)),
        "documents.sign" => Some(dispatch(state, req, documents_sign)),
        "documents.inbox" => Some(dispatch(state, req, documents_inbox)),
        "documents.tasks" => Some(dispatch(state, req, documents_tasks)),
        _ => None,
    }
}
