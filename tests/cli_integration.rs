use serde_json::Value;
use std::process::Command;
use tempfile::tempdir;

fn run_cli(args: &[&str]) -> std::process::Output {
    Command::new(assert_cmd::cargo::cargo_bin!("memsheet-cli"))
        .args(args)
        .output()
        .expect("run memsheet-cli")
}

fn parse_stdout_json(output: &std::process::Output) -> Value {
    let stdout = String::from_utf8(output.stdout.clone()).expect("stdout utf8");
    serde_json::from_str(&stdout).expect("valid json")
}

fn init_session(root: &str) -> String {
    let output = run_cli(&["--workspace-root", root, "init"]);
    assert!(output.status.success(), "stderr: {:?}", output.stderr);
    let payload = parse_stdout_json(&output);
    payload["session"].as_str().expect("session id").to_string()
}

#[test]
fn cli_init_message_show_history_flow() {
    let tmp = tempdir().expect("tempdir");
    let root = tmp.path().to_str().expect("path utf8");

    let init = run_cli(&["--workspace-root", root, "init"]);
    assert!(init.status.success(), "stderr: {:?}", init.stderr);
    let payload = parse_stdout_json(&init);
    let session = payload["session"].as_str().expect("session id").to_string();
    assert!(session.starts_with("mem_"));
    let names = payload["sheets"].as_array().expect("sheet names");
    assert!(names.iter().any(|n| n.as_str() == Some("Key Facts")));

    let text = "Noted.\n<tableEdit><!--\ninsertRow(0, {0: \"birthday\", 1: \"march 3\"})\n--></tableEdit>";
    let message = run_cli(&[
        "--workspace-root",
        root,
        "message",
        &session,
        text,
        "--role",
        "assistant",
    ]);
    assert!(message.status.success(), "stderr: {:?}", message.stderr);
    let payload = parse_stdout_json(&message);
    assert_eq!(payload["commit"]["piece"].as_u64(), Some(0));
    assert_eq!(
        payload["commit"]["reports"][0]["outcome"]["status"].as_str(),
        Some("applied")
    );

    let show = run_cli(&["--workspace-root", root, "show", &session, "--rendered"]);
    assert!(show.status.success(), "stderr: {:?}", show.stderr);
    let payload = parse_stdout_json(&show);
    let sheets = payload["sheets"].as_array().expect("sheets array");
    assert_eq!(sheets.len(), 3);
    let facts = sheets
        .iter()
        .find(|s| s["name"].as_str() == Some("Key Facts"))
        .expect("Key Facts sheet");
    assert_eq!(facts["rows"].as_u64(), Some(1));
    let rendered = payload["rendered"].as_str().expect("rendered text");
    assert!(rendered.contains("birthday"));
    assert!(rendered.contains("march 3"));

    let history = run_cli(&["--workspace-root", root, "history", &session]);
    assert!(history.status.success(), "stderr: {:?}", history.stderr);
    let payload = parse_stdout_json(&history);
    let pieces = payload["pieces"].as_array().expect("pieces array");
    assert_eq!(pieces.len(), 1);
    assert_eq!(pieces[0]["role"].as_str(), Some("assistant"));
    assert_eq!(pieces[0]["snapshot"].as_bool(), Some(true));

    let stats = run_cli(&["--workspace-root", root, "stats", &session]);
    assert!(stats.status.success(), "stderr: {:?}", stats.stderr);
    let payload = parse_stdout_json(&stats);
    assert_eq!(payload["stats"]["sheets"].as_u64(), Some(3));
    assert_eq!(payload["stats"]["snapshots"].as_u64(), Some(1));

    let list = run_cli(&["--workspace-root", root, "list"]);
    assert!(list.status.success(), "stderr: {:?}", list.stderr);
    let payload = parse_stdout_json(&list);
    let sessions = payload["sessions"].as_array().expect("sessions array");
    assert!(
        sessions
            .iter()
            .any(|entry| entry["id"].as_str() == Some(session.as_str()))
    );

    let delete = run_cli(&["--workspace-root", root, "delete", &session]);
    assert!(delete.status.success(), "stderr: {:?}", delete.stderr);
    let payload = parse_stdout_json(&delete);
    assert_eq!(payload["deleted"].as_str(), Some(session.as_str()));

    let list = run_cli(&["--workspace-root", root, "list"]);
    let payload = parse_stdout_json(&list);
    assert!(
        payload["sessions"]
            .as_array()
            .expect("sessions array")
            .is_empty()
    );
}

#[test]
fn cli_message_dry_run_is_not_persisted() {
    let tmp = tempdir().expect("tempdir");
    let root = tmp.path().to_str().expect("path utf8");
    let session = init_session(root);

    let text = "<tableEdit><!--\ninsertRow(0, {0: \"pet\", 1: \"cat\"})\n--></tableEdit>";
    let dry = run_cli(&[
        "--workspace-root",
        root,
        "message",
        &session,
        text,
        "--role",
        "assistant",
        "--dry-run",
    ]);
    assert!(dry.status.success(), "stderr: {:?}", dry.stderr);
    let payload = parse_stdout_json(&dry);
    assert_eq!(payload["dry_run"].as_bool(), Some(true));
    assert_eq!(
        payload["commit"]["reports"][0]["outcome"]["status"].as_str(),
        Some("applied")
    );

    let show = run_cli(&["--workspace-root", root, "show", &session]);
    let payload = parse_stdout_json(&show);
    for sheet in payload["sheets"].as_array().expect("sheets array") {
        assert_eq!(sheet["rows"].as_u64(), Some(0));
    }

    let history = run_cli(&["--workspace-root", root, "history", &session]);
    let payload = parse_stdout_json(&history);
    assert!(payload["pieces"].as_array().expect("pieces array").is_empty());
}

#[test]
fn cli_regenerate_and_swipe_switch_table_state() {
    let tmp = tempdir().expect("tempdir");
    let root = tmp.path().to_str().expect("path utf8");
    let session = init_session(root);

    let first = "<tableEdit><!--\ninsertRow(0, {0: \"pet\", 1: \"a cat named Miso\"})\n--></tableEdit>";
    let message = run_cli(&[
        "--workspace-root",
        root,
        "message",
        &session,
        first,
        "--role",
        "assistant",
    ]);
    assert!(message.status.success(), "stderr: {:?}", message.stderr);

    let second = "<tableEdit><!--\ninsertRow(0, {0: \"pet\", 1: \"a dog named Miso\"})\n--></tableEdit>";
    let regenerate = run_cli(&[
        "--workspace-root",
        root,
        "regenerate",
        &session,
        "0",
        second,
    ]);
    assert!(
        regenerate.status.success(),
        "stderr: {:?}",
        regenerate.stderr
    );

    let show = run_cli(&["--workspace-root", root, "show", &session, "--rendered"]);
    let payload = parse_stdout_json(&show);
    let rendered = payload["rendered"].as_str().expect("rendered text");
    assert!(rendered.contains("a dog named Miso"));
    assert!(!rendered.contains("a cat named Miso"));

    let detail = run_cli(&[
        "--workspace-root",
        root,
        "history",
        &session,
        "--piece",
        "0",
    ]);
    let payload = parse_stdout_json(&detail);
    assert_eq!(
        payload["detail"]["swipes"].as_array().expect("swipes").len(),
        2
    );
    assert_eq!(payload["detail"]["regenerated"].as_bool(), Some(true));

    let swipe = run_cli(&["--workspace-root", root, "swipe", &session, "0", "0"]);
    assert!(swipe.status.success(), "stderr: {:?}", swipe.stderr);
    let payload = parse_stdout_json(&swipe);
    assert_eq!(payload["swipe"].as_u64(), Some(0));

    let show = run_cli(&["--workspace-root", root, "show", &session, "--rendered"]);
    let payload = parse_stdout_json(&show);
    let rendered = payload["rendered"].as_str().expect("rendered text");
    assert!(rendered.contains("a cat named Miso"));
}

#[test]
fn cli_apply_export_import_round_trip() {
    let tmp = tempdir().expect("tempdir");
    let root = tmp.path().to_str().expect("path utf8");
    let session = init_session(root);

    let message = run_cli(&[
        "--workspace-root",
        root,
        "message",
        &session,
        "I'm allergic to peanuts, by the way.",
    ]);
    assert!(message.status.success(), "stderr: {:?}", message.stderr);

    let ops = r#"[{"action": "insertRow", "tableIndex": 0, "data": {"0": "allergy", "1": "peanuts"}}]"#;
    let apply = run_cli(&["--workspace-root", root, "apply", &session, ops]);
    assert!(apply.status.success(), "stderr: {:?}", apply.stderr);
    let payload = parse_stdout_json(&apply);
    assert_eq!(
        payload["commit"]["reports"][0]["outcome"]["status"].as_str(),
        Some("applied")
    );

    let export = run_cli(&["--workspace-root", root, "export", &session]);
    assert!(export.status.success(), "stderr: {:?}", export.stderr);
    let payload = parse_stdout_json(&export);
    assert_eq!(payload["document"].as_str(), Some("memsheet/tables"));
    assert_eq!(payload["version"].as_u64(), Some(2));

    let file = tmp.path().join("facts.json");
    std::fs::write(&file, &export.stdout).expect("write export");

    let import = run_cli(&[
        "--workspace-root",
        root,
        "import",
        file.to_str().expect("path utf8"),
    ]);
    assert!(import.status.success(), "stderr: {:?}", import.stderr);
    let payload = parse_stdout_json(&import);
    let imported = payload["session"].as_str().expect("session id").to_string();
    assert_ne!(imported, session);
    let names = payload["sheets"].as_array().expect("sheet names");
    assert!(names.iter().any(|n| n.as_str() == Some("Key Facts")));

    let show = run_cli(&["--workspace-root", root, "show", &imported]);
    let payload = parse_stdout_json(&show);
    let facts = payload["sheets"]
        .as_array()
        .expect("sheets array")
        .iter()
        .find(|s| s["name"].as_str() == Some("Key Facts"))
        .cloned()
        .expect("Key Facts sheet");
    assert_eq!(facts["rows"].as_u64(), Some(1));
}

#[test]
fn cli_repair_decodes_both_payload_shapes() {
    let fenced_ops = "Here you go:\n```json\n[{\"action\": \"insertRow\", \"tableIndex\": 0, \"data\": {\"0\": \"hobby\", \"1\": \"chess\"}}]\n```";
    let output = run_cli(&["repair", fenced_ops]);
    assert!(output.status.success(), "stderr: {:?}", output.stderr);
    let payload = parse_stdout_json(&output);
    assert_eq!(payload["repaired"]["kind"].as_str(), Some("ops"));
    assert_eq!(
        payload["repaired"]["ops"].as_array().expect("ops").len(),
        1
    );

    let fenced_tables = "```json\n[{\"tableName\": \"Key Facts\", \"columns\": [\"Fact\", \"Details\"], \"content\": [[\"pet\", \"cat\"]]}]\n```";
    let output = run_cli(&["repair", fenced_tables, "--expect", "1"]);
    assert!(output.status.success(), "stderr: {:?}", output.stderr);
    let payload = parse_stdout_json(&output);
    assert_eq!(payload["repaired"]["kind"].as_str(), Some("tables"));
    let tables = payload["repaired"]["tables"].as_array().expect("tables");
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0]["name"].as_str(), Some("Key Facts"));
}

#[test]
fn cli_schema_describes_the_config_surface() {
    let output = run_cli(&["schema"]);
    assert!(output.status.success(), "stderr: {:?}", output.stderr);
    let payload = parse_stdout_json(&output);
    let properties = payload["properties"].as_object().expect("properties");
    assert!(properties.contains_key("workspace_root"));
    assert!(properties.contains_key("model_endpoint"));
    assert!(properties.contains_key("sync_every_n"));
}
