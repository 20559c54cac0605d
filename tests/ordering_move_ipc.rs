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

fn order_ids(result: &serde_json::Value) -> Vec<String> {
    result
        .get("order")
        .and_then(|v| v.as_array())
        .expect("order array")
        .iter()
        .map(|e| e.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string())
        .collect()
}

fn list_names_in_order(hierarchy: &serde_json::Value, folder_id: &str) -> Vec<String> {
    let mut lists: Vec<(i64, String)> = hierarchy
        .get("lists")
        .and_then(|v| v.as_array())
        .expect("lists")
        .iter()
        .filter(|l| l.get("folderId").and_then(|v| v.as_str()) == Some(folder_id))
        .map(|l| {
            (
                l.get("position").and_then(|v| v.as_i64()).unwrap_or(-1),
                l.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            )
        })
        .collect();
    lists.sort();
    lists.into_iter().map(|(_, n)| n).collect()
}

#[test]
fn list_moves_swap_neighbours_and_stop_at_boundaries() {
    let workspace = temp_dir("coursetree-ordering-move");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let program = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "programs.create",
        json!({ "name": "Engineering" }),
    );
    let program_id = program
        .pointer("/program/id")
        .and_then(|v| v.as_str())
        .expect("program id")
        .to_string();
    let folder = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "folders.create",
        json!({ "programId": program_id, "name": "Fall" }),
    );
    let folder_id = folder
        .pointer("/folder/id")
        .and_then(|v| v.as_str())
        .expect("folder id")
        .to_string();

    let mut list_ids = Vec::new();
    for name in ["A", "B", "C"] {
        let list = request_ok(
            &mut stdin,
            &mut reader,
            &format!("l-{}", name),
            "lists.create",
            json!({ "folderId": folder_id, "name": name }),
        );
        list_ids.push(
            list.pointer("/list/id")
                .and_then(|v| v.as_str())
                .expect("list id")
                .to_string(),
        );
    }

    let top = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "lists.move",
        json!({ "listId": list_ids[0], "direction": "up" }),
    );
    assert_eq!(top.get("moved").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        top.get("reason").and_then(|v| v.as_str()),
        Some("boundary_reached")
    );

    let bottom = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "lists.move",
        json!({ "listId": list_ids[2], "direction": "down" }),
    );
    assert_eq!(bottom.get("moved").and_then(|v| v.as_bool()), Some(false));

    let moved = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "lists.move",
        json!({ "listId": list_ids[0], "direction": "down" }),
    );
    assert_eq!(moved.get("moved").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        order_ids(&moved),
        vec![list_ids[1].clone(), list_ids[0].clone(), list_ids[2].clone()]
    );

    let hierarchy = request_ok(&mut stdin, &mut reader, "7", "hierarchy.get", json!({}));
    assert_eq!(list_names_in_order(&hierarchy, &folder_id), vec!["B", "A", "C"]);

    let bad_direction = request(
        &mut stdin,
        &mut reader,
        "8",
        "lists.move",
        json!({ "listId": list_ids[0], "direction": "sideways" }),
    );
    assert_eq!(
        bad_direction.pointer("/error/code").and_then(|v| v.as_str()),
        Some("bad_params")
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn reorder_requires_an_exact_permutation_of_siblings() {
    let workspace = temp_dir("coursetree-ordering-reorder");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let program = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "programs.create",
        json!({ "name": "Arts" }),
    );
    let program_id = program
        .pointer("/program/id")
        .and_then(|v| v.as_str())
        .expect("program id")
        .to_string();

    let mut folder_ids = Vec::new();
    for name in ["One", "Two", "Three"] {
        let folder = request_ok(
            &mut stdin,
            &mut reader,
            &format!("f-{}", name),
            "folders.create",
            json!({ "programId": program_id, "name": name }),
        );
        folder_ids.push(
            folder
                .pointer("/folder/id")
                .and_then(|v| v.as_str())
                .expect("folder id")
                .to_string(),
        );
    }

    let incomplete = request(
        &mut stdin,
        &mut reader,
        "3",
        "folders.reorder",
        json!({ "programId": program_id, "orderedFolderIds": [folder_ids[2], folder_ids[0]] }),
    );
    assert_eq!(
        incomplete.pointer("/error/code").and_then(|v| v.as_str()),
        Some("bad_params")
    );

    let duplicated = request(
        &mut stdin,
        &mut reader,
        "4",
        "folders.reorder",
        json!({
            "programId": program_id,
            "orderedFolderIds": [folder_ids[0], folder_ids[0], folder_ids[1]]
        }),
    );
    assert_eq!(
        duplicated.pointer("/error/code").and_then(|v| v.as_str()),
        Some("bad_params")
    );

    let reordered = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "folders.reorder",
        json!({
            "programId": program_id,
            "orderedFolderIds": [folder_ids[2], folder_ids[0], folder_ids[1]]
        }),
    );
    assert_eq!(
        order_ids(&reordered),
        vec![folder_ids[2].clone(), folder_ids[0].clone(), folder_ids[1].clone()]
    );

    let hierarchy = request_ok(&mut stdin, &mut reader, "6", "hierarchy.get", json!({}));
    let three = hierarchy
        .get("folders")
        .and_then(|v| v.as_array())
        .expect("folders")
        .iter()
        .find(|f| f.get("id").and_then(|v| v.as_str()) == Some(folder_ids[2].as_str()))
        .and_then(|f| f.get("position"))
        .and_then(|v| v.as_i64());
    assert_eq!(three, Some(0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
