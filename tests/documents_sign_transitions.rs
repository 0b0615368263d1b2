use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schooldeskd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schooldeskd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "expected {} to fail, got {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

struct Office {
    _child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    director_id: String,
    deputy_id: String,
    teacher_id: String,
    next_id: u64,
}

impl Office {
    fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        request_ok(
            &mut self.stdin,
            &mut self.reader,
            &self.next_id.to_string(),
            method,
            params,
        )
    }

    fn call_err(&mut self, method: &str, params: serde_json::Value) -> String {
        self.next_id += 1;
        request_err_code(
            &mut self.stdin,
            &mut self.reader,
            &self.next_id.to_string(),
            method,
            params,
        )
    }

    fn create_proposed_doc(&mut self) -> i64 {
        let doc = self.call(
            "documents.create",
            json!({ "docType": "incoming", "title": "Budget circular" }),
        );
        assert_eq!(doc.get("status").and_then(|v| v.as_str()), Some("proposed"));
        doc.get("id").and_then(|v| v.as_i64()).expect("document id")
    }

    fn get_doc(&mut self, document_id: i64) -> serde_json::Value {
        self.call("documents.get", json!({ "documentId": document_id }))
    }
}

fn open_office(prefix: &str) -> Office {
    let workspace = temp_dir(prefix);
    let (child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "setup-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let mut ids = Vec::new();
    for (n, (name, position, role)) in [
        ("Director Anong", "School Director", "director"),
        ("Deputy Somchai", "Deputy Director", "deputy"),
        ("Teacher Preeda", "Teacher", "teacher"),
    ]
    .iter()
    .enumerate()
    {
        let res = request_ok(
            &mut stdin,
            &mut reader,
            &format!("setup-p{}", n),
            "personnel.create",
            json!({ "name": name, "position": position, "role": role }),
        );
        ids.push(
            res.get("personnelId")
                .and_then(|v| v.as_str())
                .expect("personnelId")
                .to_string(),
        );
    }

    Office {
        _child: child,
        stdin,
        reader,
        director_id: ids[0].clone(),
        deputy_id: ids[1].clone(),
        teacher_id: ids[2].clone(),
        next_id: 100,
    }
}

fn endorsements(doc: &serde_json::Value) -> Vec<serde_json::Value> {
    doc.get("endorsements")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("endorsements array")
}

fn recipients(doc: &serde_json::Value) -> Vec<String> {
    doc.get("recipients")
        .and_then(|v| v.as_array())
        .expect("recipients array")
        .iter()
        .filter_map(|v| v.as_str().map(|s| s.to_string()))
        .collect()
}

#[test]
fn director_endorses_proposed_without_delegate() {
    let mut office = open_office("schooldesk-sign-endorse");
    let doc_id = office.create_proposed_doc();
    let director_id = office.director_id.clone();

    let doc = office.call(
        "documents.sign",
        json!({
            "documentId": doc_id,
            "actorId": director_id,
            "signature": "data:image/png;base64,AAA",
            "comment": "Approved for circulation",
            "posX": 42.5,
            "posY": 71.0,
            "scale": 1.2
        }),
    );

    assert_eq!(doc.get("status").and_then(|v| v.as_str()), Some("endorsed"));
    assert!(doc.get("assignedTo").map(|v| v.is_null()).unwrap_or(false));
    let signed = endorsements(&doc);
    assert_eq!(signed.len(), 1);
    assert_eq!(
        signed[0].get("signerName").and_then(|v| v.as_str()),
        Some("Director Anong")
    );
    assert_eq!(
        signed[0].get("signerPosition").and_then(|v| v.as_str()),
        Some("School Director")
    );
    assert!(signed[0].get("assignedName").map(|v| v.is_null()).unwrap_or(false));
    assert_eq!(signed[0].get("posX").and_then(|v| v.as_f64()), Some(42.5));
    assert_eq!(recipients(&doc), vec![director_id]);
}

#[test]
fn director_delegation_records_assignee_and_name() {
    let mut office = open_office("schooldesk-sign-delegate");
    let doc_id = office.create_proposed_doc();
    let director_id = office.director_id.clone();
    let deputy_id = office.deputy_id.clone();

    let doc = office.call(
        "documents.sign",
        json!({
            "documentId": doc_id,
            "actorId": director_id,
            "delegateToId": deputy_id,
            "signature": "sig",
            "posX": 10.0,
            "posY": 10.0
        }),
    );

    assert_eq!(doc.get("status").and_then(|v| v.as_str()), Some("delegated"));
    assert_eq!(
        doc.get("assignedTo").and_then(|v| v.as_str()),
        Some(deputy_id.as_str())
    );
    let signed = endorsements(&doc);
    assert_eq!(signed.len(), 1);
    assert_eq!(
        signed[0].get("assignedName").and_then(|v| v.as_str()),
        Some("Deputy Somchai")
    );
}

#[test]
fn assignee_distributes_and_log_stays_append_only() {
    let mut office = open_office("schooldesk-sign-distribute");
    let doc_id = office.create_proposed_doc();
    let director_id = office.director_id.clone();
    let deputy_id = office.deputy_id.clone();

    let doc = office.call(
        "documents.sign",
        json!({
            "documentId": doc_id,
            "actorId": director_id,
            "delegateToId": deputy_id,
            "signature": "sig-director",
            "comment": "Handle this",
            "posX": 20.0,
            "posY": 30.0
        }),
    );
    let first_before = endorsements(&doc)[0].clone();

    let doc = office.call(
        "documents.sign",
        json!({
            "documentId": doc_id,
            "actorId": deputy_id,
            "signature": "sig-deputy",
            "comment": "Done",
            "posX": 55.0,
            "posY": 80.0
        }),
    );

    assert_eq!(
        doc.get("status").and_then(|v| v.as_str()),
        Some("distributed")
    );
    assert!(doc.get("assignedTo").map(|v| v.is_null()).unwrap_or(false));
    let signed = endorsements(&doc);
    assert_eq!(signed.len(), 2);
    // Earlier endorsements are pointwise untouched by later signings.
    assert_eq!(signed[0], first_before);
    let mut expected = vec![office.director_id.clone(), office.deputy_id.clone()];
    expected.sort();
    let mut got = recipients(&doc);
    got.sort();
    assert_eq!(got, expected);
}

#[test]
fn non_director_is_refused_on_proposed_with_no_mutation() {
    let mut office = open_office("schooldesk-sign-refusal");
    let doc_id = office.create_proposed_doc();
    let teacher_id = office.teacher_id.clone();

    let code = office.call_err(
        "documents.sign",
        json!({
            "documentId": doc_id,
            "actorId": teacher_id,
            "signature": "sig",
            "posX": 1.0,
            "posY": 1.0
        }),
    );
    assert_eq!(code, "not_director");

    let doc = office.get_doc(doc_id);
    assert_eq!(doc.get("status").and_then(|v| v.as_str()), Some("proposed"));
    assert!(doc.get("assignedTo").map(|v| v.is_null()).unwrap_or(false));
    assert!(endorsements(&doc).is_empty());
    assert!(recipients(&doc).is_empty());
}

#[test]
fn repeat_signer_does_not_grow_recipient_set() {
    let mut office = open_office("schooldesk-sign-recipients");
    let doc_id = office.create_proposed_doc();
    let director_id = office.director_id.clone();

    for (n, comment) in ["first pass", "second pass"].iter().enumerate() {
        let doc = office.call(
            "documents.sign",
            json!({
                "documentId": doc_id,
                "actorId": director_id,
                "signature": "sig",
                "comment": comment,
                "posX": 5.0,
                "posY": 5.0
            }),
        );
        assert_eq!(endorsements(&doc).len(), n + 1);
        assert_eq!(recipients(&doc), vec![director_id.clone()]);
    }
}

#[test]
fn delegate_may_hand_the_document_on() {
    let mut office = open_office("schooldesk-sign-redelegate");
    let doc_id = office.create_proposed_doc();
    let director_id = office.director_id.clone();
    let deputy_id = office.deputy_id.clone();
    let teacher_id = office.teacher_id.clone();

    office.call(
        "documents.sign",
        json!({
            "documentId": doc_id,
            "actorId": director_id,
            "delegateToId": deputy_id,
            "signature": "sig",
            "posX": 0.0,
            "posY": 0.0
        }),
    );
    let doc = office.call(
        "documents.sign",
        json!({
            "documentId": doc_id,
            "actorId": deputy_id,
            "delegateToId": teacher_id,
            "signature": "sig",
            "posX": 0.0,
            "posY": 0.0
        }),
    );

    assert_eq!(doc.get("status").and_then(|v| v.as_str()), Some("delegated"));
    assert_eq!(
        doc.get("assignedTo").and_then(|v| v.as_str()),
        Some(teacher_id.as_str())
    );
    assert_eq!(
        endorsements(&doc)[1]
            .get("assignedName")
            .and_then(|v| v.as_str()),
        Some("Teacher Preeda")
    );
}

#[test]
fn signing_a_missing_document_reports_not_found() {
    let mut office = open_office("schooldesk-sign-missing");
    let director_id = office.director_id.clone();
    let code = office.call_err(
        "documents.sign",
        json!({
            "documentId": 123456789,
            "actorId": director_id,
            "signature": "sig",
            "posX": 0.0,
            "posY": 0.0
        }),
    );
    assert_eq!(code, "not_found");
}

#[test]
fn placement_coordinates_are_clamped_to_the_canvas() {
    let mut office = open_office("schooldesk-sign-clamp");
    let doc_id = office.create_proposed_doc();
    let director_id = office.director_id.clone();

    let doc = office.call(
        "documents.sign",
        json!({
            "documentId": doc_id,
            "actorId": director_id,
            "signature": "sig",
            "posX": 150.0,
            "posY": -12.0
        }),
    );
    let signed = endorsements(&doc);
    assert_eq!(signed[0].get("posX").and_then(|v| v.as_f64()), Some(100.0));
    assert_eq!(signed[0].get("posY").and_then(|v| v.as_f64()), Some(0.0));
}
