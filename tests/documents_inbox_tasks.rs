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

fn request_ok(
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

fn doc_ids(result: &serde_json::Value) -> Vec<i64> {
    result
        .get("documents")
        .and_then(|v| v.as_array())
        .expect("documents")
        .iter()
        .filter_map(|d| d.get("id").and_then(|v| v.as_i64()))
        .collect()
}

#[test]
fn inbox_and_task_queues_follow_the_workflow() {
    let workspace = temp_dir("schooldesk-inbox-tasks");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let director = request_ok(
        &mut stdin,
        &mut reader,
        "p1",
        "personnel.create",
        json!({ "name": "Director Anong", "position": "School Director", "role": "director" }),
    );
    let director_id = director
        .get("personnelId")
        .and_then(|v| v.as_str())
        .expect("personnelId")
        .to_string();
    let deputy = request_ok(
        &mut stdin,
        &mut reader,
        "p2",
        "personnel.create",
        json!({ "name": "Deputy Somchai", "position": "Deputy Director", "role": "deputy" }),
    );
    let deputy_id = deputy
        .get("personnelId")
        .and_then(|v| v.as_str())
        .expect("personnelId")
        .to_string();

    let mut created = Vec::new();
    for n in 0..3 {
        let doc = request_ok(
            &mut stdin,
            &mut reader,
            &format!("d{}", n),
            "documents.create",
            json!({ "docType": "incoming", "title": format!("Memo {}", n) }),
        );
        created.push(doc.get("id").and_then(|v| v.as_i64()).expect("id"));
    }

    // All three proposals sit in the director's queue, newest first.
    let tasks = request_ok(
        &mut stdin,
        &mut reader,
        "t1",
        "documents.tasks",
        json!({ "userId": director_id }),
    );
    assert_eq!(
        doc_ids(&tasks),
        vec![created[2], created[1], created[0]]
    );

    // Nothing is delegated yet, so the deputy has no tasks and no inbox.
    let tasks = request_ok(
        &mut stdin,
        &mut reader,
        "t2",
        "documents.tasks",
        json!({ "userId": deputy_id }),
    );
    assert!(doc_ids(&tasks).is_empty());
    let inbox = request_ok(
        &mut stdin,
        &mut reader,
        "i1",
        "documents.inbox",
        json!({ "userId": deputy_id }),
    );
    assert!(doc_ids(&inbox).is_empty());

    // Delegate the oldest memo to the deputy.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "documents.sign",
        json!({
            "documentId": created[0],
            "actorId": director_id,
            "delegateToId": deputy_id,
            "signature": "sig",
            "posX": 10.0,
            "posY": 10.0
        }),
    );

    let tasks = request_ok(
        &mut stdin,
        &mut reader,
        "t3",
        "documents.tasks",
        json!({ "userId": director_id }),
    );
    assert_eq!(doc_ids(&tasks), vec![created[2], created[1]]);

    let tasks = request_ok(
        &mut stdin,
        &mut reader,
        "t4",
        "documents.tasks",
        json!({ "userId": deputy_id }),
    );
    assert_eq!(doc_ids(&tasks), vec![created[0]]);

    // Signing put the director in the recipient set; the deputy is not a
    // recipient until they sign themselves.
    let inbox = request_ok(
        &mut stdin,
        &mut reader,
        "i2",
        "documents.inbox",
        json!({ "userId": director_id }),
    );
    assert_eq!(doc_ids(&inbox), vec![created[0]]);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "s2",
        "documents.sign",
        json!({
            "documentId": created[0],
            "actorId": deputy_id,
            "signature": "sig",
            "posX": 10.0,
            "posY": 10.0
        }),
    );

    let inbox = request_ok(
        &mut stdin,
        &mut reader,
        "i3",
        "documents.inbox",
        json!({ "userId": deputy_id }),
    );
    assert_eq!(doc_ids(&inbox), vec![created[0]]);

    // Distribution empties the deputy's task queue again.
    let tasks = request_ok(
        &mut stdin,
        &mut reader,
        "t5",
        "documents.tasks",
        json!({ "userId": deputy_id }),
    );
    assert!(doc_ids(&tasks).is_empty());
}
