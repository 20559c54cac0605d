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
    let exe = env!("CARGO_BIN_EXE_coursetreed");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn coursetreed");
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
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

#[test]
fn requests_before_workspace_select_report_no_workspace() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health.get("ok").and_then(|v| v.as_bool()), Some(true));

    let resp = request(&mut stdin, &mut reader, "2", "hierarchy.get", json!({}));
    assert_eq!(error_code(&resp), Some("no_workspace"));

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read bad_json line");
    let v: serde_json::Value = serde_json::from_str(line.trim()).expect("bad_json envelope");
    assert_eq!(error_code(&v), Some("bad_json"));

    let unknown = json!({ "id": "3", "method": "nope.nothing", "params": {} });
    writeln!(stdin, "{}", unknown).expect("write unknown");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read unknown line");
    let v: serde_json::Value = serde_json::from_str(line.trim()).expect("unknown envelope");
    assert_eq!(error_code(&v), Some("not_implemented"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("coursetree-router-smoke");
    let csv_out = workspace.join("smoke-export.csv");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request(
        &mut stdin,
        &mut reader,
        "2",
        "programs.create",
        json!({ "name": "Smoke Program" }),
    );
    let program_id = created
        .get("result")
        .and_then(|v| v.get("program"))
        .and_then(|v| v.get("id"))
        .and_then(|v| v.as_str())
        .expect("program id")
        .to_string();

    let folder = request(
        &mut stdin,
        &mut reader,
        "3",
        "folders.create",
        json!({ "programId": program_id, "name": "Smoke Folder" }),
    );
    let folder_id = folder
        .pointer("/result/folder/id")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let list = request(
        &mut stdin,
        &mut reader,
        "4",
        "lists.create",
        json!({ "folderId": folder_id, "name": "Smoke List" }),
    );
    let list_id = list
        .pointer("/result/list/id")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let course = request(
        &mut stdin,
        &mut reader,
        "5",
        "courses.create",
        json!({ "listId": list_id, "title": "Smoke Course" }),
    );
    let course_id = course
        .pointer("/result/course/id")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let _ = request(&mut stdin, &mut reader, "6", "hierarchy.get", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "7",
        "lists.move",
        json!({ "listId": list_id, "direction": "down" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "8",
        "folders.reorder",
        json!({ "programId": program_id, "orderedFolderIds": [folder_id] }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "9",
        "selection.toggle",
        json!({ "kind": "program", "id": program_id }),
    );
    let _ = request(&mut stdin, &mut reader, "10", "selection.get", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "11",
        "bulk.preview",
        json!({ "kind": "archive_courses" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "12",
        "bulk.execute",
        json!({
            "kind": "change_priority",
            "courseIds": [course_id],
            "params": { "priority": "high" }
        }),
    );
    let _ = request(&mut stdin, &mut reader, "13", "export.rows", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "14",
        "export.csv",
        json!({ "outPath": csv_out.to_string_lossy() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "15",
        "import.preview",
        json!({ "inPath": csv_out.to_string_lossy() }),
    );
    let _ = request(&mut stdin, &mut reader, "16", "setup.get", json!({}));
    let _ = request(&mut stdin, &mut reader, "17", "selection.reset", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "18",
        "programs.delete",
        json!({ "programId": program_id }),
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
