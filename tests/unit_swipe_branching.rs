use memsheet::history::Piece;
use memsheet::ids::CellId;
use memsheet::sync::incremental::{commit_piece_edits, record_regenerated, switch_swipe};
use memsheet::template::TemplateSet;

mod support;

use support::builders::{session_with_sheet, tagged};

#[test]
fn updates_preserve_cell_identity_across_commits() {
    let mut session = session_with_sheet("Allies", &["Name", "Status"]);
    let templates = TemplateSet::default();
    session.transcript.push(Piece::user("met borin at the gate"));
    let first = session.transcript.push(Piece::assistant(tagged(
        r#"insertRow(0, {0: "Borin", 1: "wary"})"#,
    )));
    commit_piece_edits(&mut session, &templates, first).unwrap();

    let sheet_id = session.sheets.keys().next().unwrap().clone();
    let status_id = session
        .sheet(&sheet_id)
        .unwrap()
        .cell_at(1, 2)
        .unwrap()
        .clone();

    session.transcript.push(Piece::user("borin warmed up to us"));
    let second = session.transcript.push(Piece::assistant(tagged(
        r#"updateRow(0, 0, {1: "loyal"})"#,
    )));
    let commit = commit_piece_edits(&mut session, &templates, second).unwrap();
    assert_eq!(commit.source, Some(first));
    assert_eq!(commit.report.applied(), 1);

    // The update wrote through the existing cell instead of minting a new
    // one, so the whole value history stays attached to one id.
    let sheet = session.sheet(&sheet_id).unwrap();
    assert_eq!(sheet.data_rows(), 1);
    assert_eq!(sheet.row_values(&session.store, 1), vec!["Borin", "loyal"]);
    assert_eq!(sheet.cell_at(1, 2), Some(&status_id));

    let cell = session.store.get(&status_id).unwrap();
    assert_eq!(cell.text(), "loyal");
    assert_eq!(cell.history.len(), 2);
    assert_eq!(cell.history[1].value.text, "wary");

    for index in [first, second] {
        let snapshot = session.transcript.get(index).unwrap().snapshot().unwrap();
        assert!(
            snapshot
                .grid(&sheet_id)
                .unwrap()
                .iter()
                .flatten()
                .any(|id| id == &status_id),
            "piece {index} snapshot lost the status cell"
        );
    }
}

#[test]
fn regeneration_branches_state_and_keeps_alternates_reachable() {
    let mut session = session_with_sheet("Key Facts", &["Fact", "Details"]);
    let templates = TemplateSet::default();
    session.transcript.push(Piece::user("we met an ally"));
    let piece = session.transcript.push(Piece::assistant(tagged(
        r#"insertRow(0, {0: "ally", 1: "Borin"})"#,
    )));
    commit_piece_edits(&mut session, &templates, piece).unwrap();

    let commit = record_regenerated(
        &mut session,
        &templates,
        piece,
        tagged(r#"insertRow(0, {0: "ally", 1: "Mira"})"#),
    )
    .unwrap();
    assert_eq!(commit.report.applied(), 1);

    let branched = session.transcript.get(piece).unwrap();
    assert_eq!(branched.swipes.len(), 2);
    assert_eq!(branched.selected, 1);
    assert!(branched.regenerated);
    assert!(branched.swipes[0].snapshot.is_some());
    assert!(branched.swipes[1].snapshot.is_some());

    let sheet = session.sheets.values().next().unwrap();
    assert_eq!(sheet.row_values(&session.store, 1), vec!["ally", "Mira"]);

    // Nothing was structurally removed, so the first branch's cells stay
    // live behind its snapshot and a sweep has nothing to drop.
    assert_eq!(session.sweep(), 0);
    assert_eq!(session.stats().snapshots, 2);

    let back = switch_swipe(&mut session, &templates, piece, 0).unwrap();
    assert!(back.is_none());
    let sheet = session.sheets.values().next().unwrap();
    assert_eq!(sheet.row_values(&session.store, 1), vec!["ally", "Borin"]);
}

#[test]
fn history_rewrite_lets_sweep_reclaim_orphaned_cells() {
    let mut session = session_with_sheet("Key Facts", &["Fact", "Details"]);
    let templates = TemplateSet::default();
    let noted = session.transcript.push(Piece::assistant(tagged(
        r#"insertRow(0, {0: "pet", 1: "cat"})"#,
    )));
    commit_piece_edits(&mut session, &templates, noted).unwrap();

    let sheet_id = session.sheets.keys().next().unwrap().clone();
    let row_ids: Vec<CellId> = session.sheet(&sheet_id).unwrap().grid[1].clone();
    assert_eq!(row_ids.len(), 3);

    let removed = session
        .transcript
        .push(Piece::assistant(tagged("deleteRow(0, 0)")));
    commit_piece_edits(&mut session, &templates, removed).unwrap();
    assert_eq!(session.sheet(&sheet_id).unwrap().data_rows(), 0);

    // The deleted row is tombstoned but still pinned by the first snapshot.
    assert_eq!(session.sweep(), 0);
    assert_eq!(session.store.stats().evicted, 3);

    // Rewrite history so the row was never recorded, then recommit. The
    // delete downstream reprocesses against the empty table and the old
    // row's cells lose their last reference.
    session
        .transcript
        .get_mut(noted)
        .unwrap()
        .set_text("nothing worth recording");
    let commit = commit_piece_edits(&mut session, &templates, noted).unwrap();
    assert_eq!(commit.cascaded, vec![removed]);

    assert_eq!(session.sweep(), 3);
    for id in &row_ids {
        assert!(session.store.get(id).is_none());
    }
}

#[test]
fn switching_to_an_uncommitted_swipe_cascades_downstream() {
    let mut session = session_with_sheet("Key Facts", &["Fact", "Details"]);
    let templates = TemplateSet::default();
    let mood = session.transcript.push(Piece::assistant(tagged(
        r#"insertRow(0, {0: "mood", 1: "sunny"})"#,
    )));
    let job = session.transcript.push(Piece::assistant(tagged(
        r#"insertRow(0, {0: "job", 1: "baker"})"#,
    )));
    commit_piece_edits(&mut session, &templates, mood).unwrap();
    commit_piece_edits(&mut session, &templates, job).unwrap();

    session
        .transcript
        .get_mut(mood)
        .unwrap()
        .add_swipe(tagged(r#"insertRow(0, {0: "mood", 1: "stormy"})"#));
    let commit = switch_swipe(&mut session, &templates, mood, 1)
        .unwrap()
        .expect("fresh swipe needs a commit");
    assert_eq!(commit.piece, mood);
    assert_eq!(commit.cascaded, vec![job]);

    // Downstream edits were replayed on top of the new branch.
    let sheet = session.sheets.values().next().unwrap();
    assert_eq!(sheet.data_rows(), 2);
    assert_eq!(sheet.row_values(&session.store, 1), vec!["mood", "stormy"]);
    assert_eq!(sheet.row_values(&session.store, 2), vec!["job", "baker"]);
}
