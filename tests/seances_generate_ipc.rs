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
        .env("ECOLED_NOW", "2025-01-01T00:00:00")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn ecoled");
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
        "caller": { "userId": "admin-1", "isAdmin": true },
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

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn dates_of(seances: &serde_json::Value) -> Vec<(String, i64)> {
    seances
        .as_array()
        .expect("seances array")
        .iter()
        .map(|s| {
            (
                s["dateHeure"].as_str().expect("dateHeure").to_string(),
                s["weekNumber"].as_i64().expect("weekNumber"),
            )
        })
        .collect()
}

#[test]
fn generation_places_sparse_weeks_and_is_idempotent() {
    let workspace = temp_dir("ecoled-generate");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let eleve = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "eleves.create",
        json!({ "lastName": "Martin", "firstName": "Zoe" }),
    );
    let eleve_id = eleve["eleveId"].as_str().expect("eleveId").to_string();
    let classe = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({
            "name": "Solfege A",
            "dureeSeance": 45,
            "semainesSeances": [1, 2, 4],
            "rrPossibles": true,
            "eleveIds": [eleve_id]
        }),
    );
    let classe_id = classe["id"].as_str().expect("classe id").to_string();

    let generated = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "seances.generate",
        json!({ "classeId": classe_id, "annee": 2025, "jourSemaine": 2, "heureDebut": "14:00" }),
    );
    assert_eq!(generated["created"].as_i64(), Some(3));
    assert_eq!(generated["skipped"].as_i64(), Some(0));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "seances.list",
        json!({ "classeId": classe_id }),
    );
    assert_eq!(
        dates_of(&listed["seances"]),
        vec![
            ("2025-01-07T14:00:00".to_string(), 1),
            ("2025-01-14T14:00:00".to_string(), 2),
            ("2025-01-28T14:00:00".to_string(), 3),
        ]
    );
    for s in listed["seances"].as_array().expect("seances") {
        assert_eq!(s["duree"].as_i64(), Some(45));
        assert_eq!(s["statut"].as_str(), Some("programmed"));
        assert_eq!(s["rrPossibles"].as_bool(), Some(true));
    }

    let first_id = listed["seances"][0]["id"].as_str().expect("seance id").to_string();
    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "presences.forSeance",
        json!({ "seanceId": first_id }),
    );
    let presences = roster["presences"].as_array().expect("presences");
    assert_eq!(presences.len(), 1);
    assert_eq!(presences[0]["statut"].as_str(), Some("no_status"));
    assert!(presences[0]["rr"].is_null());

    let again = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "seances.generate",
        json!({ "classeId": classe_id, "annee": 2025, "jourSemaine": 2, "heureDebut": "14:00" }),
    );
    assert_eq!(again["created"].as_i64(), Some(0));
    assert_eq!(again["skipped"].as_i64(), Some(3));
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "seances.list",
        json!({ "classeId": classe_id }),
    );
    assert_eq!(listed["seances"].as_array().map(|a| a.len()), Some(3));
}

#[test]
fn unordered_week_set_is_numbered_chronologically() {
    let workspace = temp_dir("ecoled-generate-order");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let classe = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "Piano", "semainesSeances": [3, 1, 2] }),
    );
    let classe_id = classe["id"].as_str().expect("classe id").to_string();
    assert_eq!(classe["dureeSeance"].as_i64(), Some(60));

    let generated = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "seances.generate",
        json!({ "classeId": classe_id, "annee": 2025, "jourSemaine": 5, "heureDebut": "9:30" }),
    );
    assert_eq!(generated["created"].as_i64(), Some(3));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "seances.list",
        json!({ "classeId": classe_id }),
    );
    assert_eq!(
        dates_of(&listed["seances"]),
        vec![
            ("2025-01-10T09:30:00".to_string(), 1),
            ("2025-01-17T09:30:00".to_string(), 2),
            ("2025-01-24T09:30:00".to_string(), 3),
        ]
    );
}

#[test]
fn generation_rejects_bad_inputs() {
    let workspace = temp_dir("ecoled-generate-bad");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let classe = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "Chant", "semainesSeances": [1] }),
    );
    let classe_id = classe["id"].as_str().expect("classe id").to_string();

    let cases = [
        json!({ "classeId": classe_id, "annee": 2025, "jourSemaine": 0, "heureDebut": "14:00" }),
        json!({ "classeId": classe_id, "annee": 2025, "jourSemaine": 8, "heureDebut": "14:00" }),
        json!({ "classeId": classe_id, "annee": 2025, "jourSemaine": 2, "heureDebut": "25:00" }),
        json!({ "classeId": classe_id, "annee": 1850, "jourSemaine": 2, "heureDebut": "14:00" }),
    ];
    for (i, params) in cases.into_iter().enumerate() {
        let resp = request(&mut stdin, &mut reader, &format!("bad-{i}"), "seances.generate", params);
        assert_eq!(resp["ok"].as_bool(), Some(false));
        assert_eq!(error_code(&resp), "bad_params");
    }

    let missing = request(
        &mut stdin,
        &mut reader,
        "3",
        "seances.generate",
        json!({ "classeId": "nope", "annee": 2025, "jourSemaine": 2, "heureDebut": "14:00" }),
    );
    assert_eq!(error_code(&missing), "not_found");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "seances.list",
        json!({ "classeId": classe_id }),
    );
    assert_eq!(listed["seances"].as_array().map(|a| a.len()), Some(0));
}

#[test]
fn manual_seance_collides_with_generated_one() {
    let workspace = temp_dir("ecoled-seance-create");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let classe = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "Violon", "semainesSeances": [2] }),
    );
    let classe_id = classe["id"].as_str().expect("classe id").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "seances.generate",
        json!({ "classeId": classe_id, "annee": 2025, "jourSemaine": 1, "heureDebut": "10:00" }),
    );

    let dup = request(
        &mut stdin,
        &mut reader,
        "4",
        "seances.create",
        json!({ "classeId": classe_id, "dateHeure": "2025-01-13T10:00" }),
    );
    assert_eq!(error_code(&dup), "already_exists");

    let extra = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "seances.create",
        json!({ "classeId": classe_id, "dateHeure": "2025-01-02T10:00:00", "duree": 30 }),
    );
    assert_eq!(extra["duree"].as_i64(), Some(30));
    assert!(extra["weekNumber"].is_null());

    let renumbered = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "seances.renumber",
        json!({ "classeId": classe_id }),
    );
    assert_eq!(renumbered["count"].as_i64(), Some(2));
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "seances.list",
        json!({ "classeId": classe_id }),
    );
    assert_eq!(
        dates_of(&listed["seances"]),
        vec![
            ("2025-01-02T10:00:00".to_string(), 1),
            ("2025-01-13T10:00:00".to_string(), 2),
        ]
    );
}

#[test]
fn omitted_slot_falls_back_to_class_template() {
    let workspace = temp_dir("ecoled-generate-template");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    // jourSemaine on the class counts from Sunday = 0.
    let classe = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.create",
        json!({ "name": "Orgue", "semainesSeances": [1, 2], "jourSemaine": 0, "heureDebut": "11:15" }),
    );
    let classe_id = classe["id"].as_str().expect("classe id").to_string();

    let generated = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "seances.generate",
        json!({ "classeId": classe_id, "annee": 2025 }),
    );
    assert_eq!(generated["created"].as_i64(), Some(2));
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "seances.list",
        json!({ "classeId": classe_id }),
    );
    assert_eq!(
        dates_of(&listed["seances"]),
        vec![
            ("2025-01-12T11:15:00".to_string(), 1),
            ("2025-01-19T11:15:00".to_string(), 2),
        ]
    );

    let bare = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "classes.create",
        json!({ "name": "Harpe", "semainesSeances": [1] }),
    );
    let resp = request(
        &mut stdin,
        &mut reader,
        "6",
        "seances.generate",
        json!({ "classeId": bare["id"], "annee": 2025 }),
    );
    assert_eq!(error_code(&resp), "bad_params");
}
