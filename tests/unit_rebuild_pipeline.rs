use anyhow::Result;
use memsheet::client::{CancelToken, ScriptedClient};
use memsheet::errors::SyncError;
use memsheet::history::Piece;
use memsheet::prompt::ProfileLibrary;
use memsheet::sheet::SheetKind;
use memsheet::sync::incremental::{commit_ops, commit_piece_edits};
use memsheet::sync::rebuild::{RebuildOptions, RebuildOutcome, run_rebuild};
use memsheet::template::TemplateSet;

mod support;

use support::TestWorkspace;
use support::builders::{session_with_sheet, tagged};

fn facts_templates_json() -> String {
    let mut set = TemplateSet::new();
    set.add_template(
        "Key Facts",
        None,
        &[("Fact", None), ("Details", None)],
        SheetKind::Dynamic,
    );
    serde_json::to_string(&set).expect("serialize template set")
}

#[tokio::test(flavor = "current_thread")]
async fn incremental_then_rebuild_survives_a_reload() -> Result<()> {
    let workspace = TestWorkspace::new();
    workspace.write_file("templates.json", &facts_templates_json());
    let state = support::engine_state(&workspace);

    let mut session = state.create_session()?;
    assert_eq!(session.sheets.len(), 1);
    session.transcript.push(Piece::user("my cat is named Miso"));
    let answer = session.transcript.push(Piece::assistant(tagged(
        r#"insertRow(0, {0: "pet", 1: "cat named Miso"})"#,
    )));
    commit_piece_edits(&mut session, state.templates(), answer)?;
    state.save_session(&session)?;

    let client = ScriptedClient::new([
        r#"[{"tableName":"Key Facts","columns":["Fact","Details"],"content":[["pet","dog named Miso"],["home","riverside flat"]]}]"#,
    ]);
    let options = RebuildOptions {
        silent: true,
        ..RebuildOptions::default()
    };
    let outcome = run_rebuild(
        &mut session,
        state.profiles(),
        &client,
        &CancelToken::new(),
        &options,
    )
    .await?;
    let RebuildOutcome::Committed(report) = outcome else {
        panic!("expected a committed rebuild");
    };
    assert_eq!(report.piece, Some(answer));
    state.save_session(&session)?;

    // A second engine over the same workspace sees the rebuilt state,
    // including the pre-rebuild text down in cell history.
    let reopened = support::engine_state(&workspace);
    let restored = reopened.load_session(&session.id)?;
    let sheet = restored.sheets.values().next().unwrap();
    assert_eq!(sheet.data_rows(), 2);
    assert_eq!(
        sheet.row_values(&restored.store, 1),
        vec!["pet", "dog named Miso"]
    );
    assert_eq!(
        sheet.row_values(&restored.store, 2),
        vec!["home", "riverside flat"]
    );

    let edited = sheet.cell_at(1, 2).unwrap();
    let cell = restored.store.get(edited).unwrap();
    assert!(
        cell.history
            .iter()
            .any(|entry| entry.value.text == "cat named Miso")
    );
    assert!(restored.transcript.get(answer).unwrap().snapshot().is_some());
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn op_list_answers_reenter_the_incremental_path() -> Result<()> {
    let mut session = session_with_sheet("Key Facts", &["Fact", "Details"]);
    let templates = TemplateSet::default();
    session.transcript.push(Piece::user("i started playing chess"));
    let answer = session
        .transcript
        .push(Piece::assistant("good luck at the club!"));

    let client = ScriptedClient::new([
        r#"[{"action":"insertRow","tableIndex":0,"data":{"0":"hobby","1":"chess"}}]"#,
    ]);
    let outcome = run_rebuild(
        &mut session,
        &ProfileLibrary::builtin(),
        &client,
        &CancelToken::new(),
        &RebuildOptions::default(),
    )
    .await?;
    let RebuildOutcome::Ops(ops) = outcome else {
        panic!("expected an op list");
    };

    let commit = commit_ops(&mut session, &templates, answer, ops)?;
    assert_eq!(commit.report.applied(), 1);

    let sheet = session.sheets.values().next().unwrap();
    assert_eq!(sheet.data_rows(), 1);
    assert_eq!(sheet.row_values(&session.store, 1), vec!["hobby", "chess"]);

    // The op list was written back into the message as a canonical tag, so
    // the table state stays derivable from the transcript alone.
    let piece = session.transcript.get(answer).unwrap();
    assert!(piece.text().starts_with("good luck at the club!"));
    assert!(
        piece
            .text()
            .contains(r#"insertRow(0, {"0":"hobby","1":"chess"})"#),
        "{}",
        piece.text()
    );
    assert!(piece.snapshot().is_some());
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn workspace_profiles_select_the_rebuild_prompt() -> Result<()> {
    let workspace = TestWorkspace::new();
    workspace.write_file("templates.json", &facts_templates_json());
    workspace.write_file(
        "profiles.yaml",
        concat!(
            "audit:\n",
            "  system: You are a meticulous record keeper.\n",
            "  user: |\n",
            "    Rewrite these tables from the conversation.\n",
            "    {{schema}}\n",
            "    {{tables}}\n",
            "    {{context}}\n",
        ),
    );
    let state = support::engine_state(&workspace);
    assert!(state.profiles().get("audit").is_some());

    let mut session = state.create_session()?;
    session
        .transcript
        .push(Piece::user("remember the ferry leaves at noon"));
    session.transcript.push(Piece::assistant("noted"));

    let client = ScriptedClient::new([
        r#"[{"tableName":"Key Facts","columns":["Fact","Details"],"content":[["ferry","leaves at noon"]]}]"#,
    ]);
    let options = RebuildOptions {
        profile: "audit".to_string(),
        silent: true,
        ..RebuildOptions::default()
    };
    let outcome = run_rebuild(
        &mut session,
        state.profiles(),
        &client,
        &CancelToken::new(),
        &options,
    )
    .await?;
    assert!(matches!(outcome, RebuildOutcome::Committed(_)));
    let sheet = session.sheets.values().next().unwrap();
    assert_eq!(
        sheet.row_values(&session.store, 1),
        vec!["ferry", "leaves at noon"]
    );

    let missing = RebuildOptions {
        profile: "no-such-profile".to_string(),
        ..RebuildOptions::default()
    };
    let err = run_rebuild(
        &mut session,
        state.profiles(),
        &ScriptedClient::new(["ignored"]),
        &CancelToken::new(),
        &missing,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SyncError::UnknownProfile(_)));
    Ok(())
}
