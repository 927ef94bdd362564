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
    let exe = env!("CARGO_BIN_EXE_ecoled");
    let mut child = Command::new(exe)
        .env("ECOLED_NOW", "2025-03-01T12:00:00")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn ecoled");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn read_response(reader: &mut BufReader<ChildStdout>, method: &str) -> serde_json::Value {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    serde_json::from_str(line.trim()).expect("parse response json")
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    caller: serde_json::Value,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
        "caller": caller,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let value = read_response(reader, method);
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(code, "internal", "internal error for {}", method);
    }
    value
}

fn admin() -> serde_json::Value {
    json!({ "userId": "admin-1", "isAdmin": true })
}

fn code(value: &serde_json::Value) -> Option<&str> {
    value.get("error").and_then(|e| e.get("code")).and_then(|v| v.as_str())
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("ecoled-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, json!(null), "1", "health", json!({}));
    assert_eq!(health["result"]["now"].as_str(), Some("2025-03-01T12:00:00"));
    assert!(health["result"]["workspacePath"].is_null());

    let early = request(&mut stdin, &mut reader, admin(), "2", "classes.get", json!({ "classeId": "x" }));
    assert_eq!(code(&early), Some("no_workspace"));
    let empty = request(&mut stdin, &mut reader, admin(), "3", "classes.list", json!({}));
    assert_eq!(empty["result"]["classes"].as_array().map(|a| a.len()), Some(0));

    let selected = request(
        &mut stdin,
        &mut reader,
        admin(),
        "4",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(selected["ok"].as_bool(), Some(true));
    assert!(workspace.join("ecole.sqlite3").exists());

    let user = request(
        &mut stdin,
        &mut reader,
        admin(),
        "5",
        "users.create",
        json!({ "name": "Anne Dupont", "email": "Anne@Ecole.test" }),
    );
    let teacher_id = user["result"]["userId"].as_str().expect("userId").to_string();
    assert_eq!(user["result"]["email"].as_str(), Some("anne@ecole.test"));
    let dup = request(
        &mut stdin,
        &mut reader,
        admin(),
        "6",
        "users.create",
        json!({ "name": "Anne bis", "email": "anne@ecole.test" }),
    );
    assert_eq!(code(&dup), Some("already_exists"));

    let classe = request(
        &mut stdin,
        &mut reader,
        admin(),
        "7",
        "classes.create",
        json!({ "name": "Guitare", "teacherId": teacher_id, "semainesSeances": [10], "jourSemaine": 3 }),
    );
    let classe_id = classe["result"]["id"].as_str().expect("classe id").to_string();
    assert_eq!(classe["result"]["teacher"]["name"].as_str(), Some("Anne Dupont"));
    assert_eq!(classe["result"]["jourSemaine"].as_i64(), Some(3));

    let listed = request(&mut stdin, &mut reader, admin(), "8", "classes.list", json!({}));
    assert_eq!(listed["result"]["classes"][0]["id"].as_str(), Some(classe_id.as_str()));

    let users = request(&mut stdin, &mut reader, admin(), "9", "users.list", json!({}));
    assert_eq!(users["result"]["users"][0]["classCount"].as_i64(), Some(1));

    let _ = request(
        &mut stdin,
        &mut reader,
        admin(),
        "10",
        "settings.set",
        json!({ "key": "setup.scheduling", "value": { "defaultRrType": "evening_recuperation" } }),
    );
    let setting = request(
        &mut stdin,
        &mut reader,
        admin(),
        "11",
        "settings.get",
        json!({ "key": "setup.scheduling" }),
    );
    assert_eq!(
        setting["result"]["value"]["defaultRrType"].as_str(),
        Some("evening_recuperation")
    );

    let unknown = request(&mut stdin, &mut reader, admin(), "12", "grades.compute", json!({}));
    assert_eq!(code(&unknown), Some("not_implemented"));

    let deleted = request(
        &mut stdin,
        &mut reader,
        admin(),
        "13",
        "classes.delete",
        json!({ "classeId": classe_id }),
    );
    assert_eq!(deleted["ok"].as_bool(), Some(true));
    let gone = request(&mut stdin, &mut reader, admin(), "14", "classes.get", json!({ "classeId": classe_id }));
    assert_eq!(code(&gone), Some("not_found"));

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush garbage");
    let bad = read_response(&mut reader, "garbage");
    assert_eq!(code(&bad), Some("bad_json"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn admin_only_methods_reject_other_callers() {
    let workspace = temp_dir("ecoled-router-auth");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request(
        &mut stdin,
        &mut reader,
        admin(),
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let teacher = json!({ "userId": "teacher-1", "isAdmin": false });
    let guarded = [
        ("classes.create", json!({ "name": "Flute" })),
        ("classes.update", json!({ "classeId": "x", "dureeSeance": 30 })),
        ("classes.delete", json!({ "classeId": "x" })),
        ("seances.generate", json!({ "classeId": "x", "annee": 2025, "jourSemaine": 1, "heureDebut": "10:00" })),
        ("rr.update", json!({ "rrId": "x", "status": "cancelled" })),
        ("rr.delete", json!({ "rrId": "x" })),
        ("settings.set", json!({ "key": "k", "value": 1 })),
        ("users.create", json!({ "name": "X", "email": "x@ecole.test" })),
        ("eleves.create", json!({ "lastName": "X", "firstName": "Y" })),
    ];
    for (i, (method, params)) in guarded.into_iter().enumerate() {
        for (j, caller) in [teacher.clone(), json!(null)].into_iter().enumerate() {
            let resp = request(&mut stdin, &mut reader, caller, &format!("g-{i}-{j}"), method, params.clone());
            assert_eq!(code(&resp), Some("forbidden"), "{} should be admin-only", method);
        }
    }

    let classes = request(&mut stdin, &mut reader, teacher.clone(), "2", "classes.list", json!({}));
    assert_eq!(classes["result"]["classes"].as_array().map(|a| a.len()), Some(0));
    let update = request(
        &mut stdin,
        &mut reader,
        json!(null),
        "3",
        "presences.update",
        json!({ "seanceId": "x", "eleveId": "y", "statut": "present" }),
    );
    assert_eq!(code(&update), Some("forbidden"));
}

#[test]
fn workspace_open_failure_keeps_details_out_of_the_reply() {
    let base = temp_dir("ecoled-ipc-bad-workspace");
    let blocker = base.join("not-a-dir");
    std::fs::write(&blocker, b"plain file").expect("write blocker file");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let resp = request(
        &mut stdin,
        &mut reader,
        admin(),
        "1",
        "workspace.select",
        json!({ "path": blocker.join("ws").to_string_lossy() }),
    );
    assert_eq!(code(&resp), Some("db_open_failed"));
    let message = resp["error"]["message"].as_str().expect("message");
    assert!(!message.contains("not-a-dir"), "{message}");
    assert!(!message.contains("Os {"), "{message}");

    let health = request(&mut stdin, &mut reader, admin(), "2", "health", json!({}));
    assert!(health["result"]["workspacePath"].is_null());
}
