use crate::action::{Action, apply_batch};
use crate::cell::CellValue;
use crate::client::{CancelToken, CompletionClient, CompletionRequest};
use crate::diff::{RowDelta, ValueGrid, diff_rows};
use crate::errors::{SyncError, Warning};
use crate::history::Snapshot;
use crate::ids::SheetId;
use crate::parse::edit_tag::TableOp;
use crate::parse::repair::{Repaired, TablePayload, repair_response};
use crate::prompt::{
    ProfileLibrary, PromptInputs, assemble_context, fill_profile, render_schema_text,
    render_tables_text,
};
use crate::session::Session;
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RebuildOptions {
    pub profile: String,
    /// Commit the validated replacement immediately instead of returning a
    /// proposal.
    pub silent: bool,
    pub temperature: Option<f32>,
    pub max_context_messages: Option<usize>,
    pub max_context_tokens: Option<usize>,
}

impl Default for RebuildOptions {
    fn default() -> Self {
        RebuildOptions {
            profile: crate::prompt::PROFILE_REBUILD.to_string(),
            silent: false,
            temperature: None,
            max_context_messages: None,
            max_context_tokens: None,
        }
    }
}

/// One sheet's validated replacement, paired with the delta against the
/// captured pre-state.
#[derive(Debug, Clone, Serialize)]
pub struct TableRevision {
    pub sheet: SheetId,
    pub name: String,
    pub delta: RowDelta,
    /// Replacement data rows, already coerced to the sheet's column count.
    pub replacement: Vec<Vec<String>>,
}

/// A rebuild the caller still has to approve. Captures are by value, so the
/// proposal stays reviewable even if the session moves on.
#[derive(Debug, Serialize)]
pub struct RebuildProposal {
    pub captures: Vec<ValueGrid>,
    pub revisions: Vec<TableRevision>,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Serialize)]
pub struct TableCommit {
    pub sheet: SheetId,
    pub name: String,
    pub applied: usize,
    pub rejected: usize,
    pub delta: RowDelta,
}

#[derive(Debug, Serialize)]
pub struct RebuildReport {
    pub tables: Vec<TableCommit>,
    /// Piece the post-rebuild snapshot was attached to, when the transcript
    /// has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub piece: Option<usize>,
    pub warnings: Vec<Warning>,
}

#[derive(Debug)]
pub enum RebuildOutcome {
    Committed(RebuildReport),
    Proposed(RebuildProposal),
    /// The model answered with an incremental operation list instead of
    /// replacement tables. Feed it through the normal commit path.
    Ops(Vec<TableOp>),
}

/// Asks the model to rewrite every prompt-visible sheet from the transcript
/// and validates the answer against the pre-rebuild schema. Nothing is
/// mutated before the response survives repair and validation; a
/// cancellation observed after the response arrives discards it unapplied.
pub async fn run_rebuild(
    session: &mut Session,
    library: &ProfileLibrary,
    client: &dyn CompletionClient,
    cancel: &CancelToken,
    options: &RebuildOptions,
) -> Result<RebuildOutcome, SyncError> {
    let profile = library
        .get(&options.profile)
        .ok_or_else(|| SyncError::UnknownProfile(options.profile.clone()))?;

    let visible: Vec<_> = session
        .current_sheets()
        .into_iter()
        .filter(|s| s.config.include_in_prompt)
        .collect();
    if visible.is_empty() {
        return Err(SyncError::NothingToRebuild);
    }

    // Everything the diff will later need is captured by value up front;
    // the response can take arbitrarily long to arrive.
    let captures: Vec<ValueGrid> = visible
        .iter()
        .map(|s| ValueGrid::capture(s, &session.store))
        .collect();

    let context = assemble_context(
        &session.transcript,
        session.transcript.len(),
        options.max_context_messages,
        options.max_context_tokens,
    );
    let inputs = PromptInputs {
        tables: render_tables_text(&visible, &session.store),
        context: context.text,
        schema: render_schema_text(&visible, &session.store),
    };
    let filled = fill_profile(profile, &inputs);
    let request = CompletionRequest {
        system: filled.system,
        user: filled.user,
        temperature: options.temperature,
    };

    debug!(
        profile = options.profile.as_str(),
        tables = captures.len(),
        context_pieces = context.included,
        client = client.describe().as_str(),
        "rebuild requested"
    );
    let raw = client.complete(&request).await?;
    if cancel.is_cancelled() {
        debug!("rebuild response discarded: cancelled");
        return Err(SyncError::Cancelled);
    }

    let (repaired, warnings) = repair_response(&raw, captures.len())?;
    match repaired {
        Repaired::Ops(ops) => {
            debug!(ops = ops.len(), "rebuild answered with an operation list");
            Ok(RebuildOutcome::Ops(ops))
        }
        Repaired::Tables(tables) => {
            let proposal = validate_tables(captures, tables, warnings)?;
            if options.silent {
                let report = commit_rebuild(session, &proposal)?;
                Ok(RebuildOutcome::Committed(report))
            } else {
                Ok(RebuildOutcome::Proposed(proposal))
            }
        }
    }
}

/// Checks a repaired table array against the captured schema: same table
/// count, and per table the exact captured column count. Names and headers
/// may drift in the response; they are reported but never committed, since
/// column structure belongs to the session.
fn validate_tables(
    captures: Vec<ValueGrid>,
    tables: Vec<TablePayload>,
    mut warnings: Vec<Warning>,
) -> Result<RebuildProposal, SyncError> {
    if tables.len() != captures.len() {
        return Err(SyncError::SchemaMismatch {
            table: "(response)".to_string(),
            what: "tables",
            expected: captures.len(),
            found: tables.len(),
        });
    }

    let mut revisions = Vec::with_capacity(tables.len());
    for (capture, payload) in captures.iter().zip(tables) {
        let expected_cols = capture.cols().saturating_sub(1);
        if payload.columns.len() != expected_cols {
            return Err(SyncError::SchemaMismatch {
                table: capture.name.clone(),
                what: "columns",
                expected: expected_cols,
                found: payload.columns.len(),
            });
        }
        if !payload.name.trim().eq_ignore_ascii_case(capture.name.trim()) {
            warn!(
                expected = capture.name.as_str(),
                found = payload.name.as_str(),
                "rebuild renamed a table; keeping the session name"
            );
            warnings.push(Warning::new(
                "WARN_NAME_DRIFT",
                format!("response renamed '{}' to '{}'", capture.name, payload.name),
            ));
        }

        let delta = diff_rows(capture, &payload.content);
        revisions.push(TableRevision {
            sheet: capture.sheet.clone(),
            name: capture.name.clone(),
            delta,
            replacement: payload.content,
        });
    }
    Ok(RebuildProposal {
        captures,
        revisions,
        warnings,
    })
}

/// Applies a validated proposal to the live session. Replacement content is
/// translated into ordinary cell edits, so surviving rows keep their cell
/// ids and their value history. The post-rebuild state is snapshotted onto
/// the newest assistant message.
pub fn commit_rebuild(
    session: &mut Session,
    proposal: &RebuildProposal,
) -> Result<RebuildReport, SyncError> {
    for revision in &proposal.revisions {
        if !session.sheets.contains_key(&revision.sheet) {
            return Err(SyncError::UnknownTable(revision.name.clone()));
        }
    }

    let mut tables = Vec::with_capacity(proposal.revisions.len());
    for revision in &proposal.revisions {
        let Some(sheet) = session.sheets.get_mut(&revision.sheet) else {
            continue;
        };
        sheet.clear_markers();
        let actions = revision_actions(sheet, &session.store, &revision.replacement);
        let report = apply_batch(sheet, &mut session.store, actions);
        super::mark_changes(sheet, &report.changes);
        tables.push(TableCommit {
            sheet: revision.sheet.clone(),
            name: revision.name.clone(),
            applied: report.applied(),
            rejected: report.rejected(),
            delta: revision.delta.clone(),
        });
    }

    let piece = session
        .transcript
        .last_assistant_index()
        .or_else(|| session.transcript.last_index());
    if let Some(index) = piece {
        let snapshot = Snapshot::from_sheets(session.sheets.values());
        if let Some(piece) = session.transcript.get_mut(index) {
            piece.set_snapshot(snapshot);
        }
    }
    session.touch();

    info!(
        tables = tables.len(),
        snapshot_piece = piece,
        "rebuild committed"
    );
    Ok(RebuildReport {
        tables,
        piece,
        warnings: proposal.warnings.clone(),
    })
}

/// Translates a replacement table into an action batch against the sheet's
/// current shape. Shared rows become cell edits (only where text actually
/// differs), extra replacement rows are appended, and leftover current rows
/// are deleted.
fn revision_actions(
    sheet: &crate::sheet::Sheet,
    store: &crate::store::CellStore,
    replacement: &[Vec<String>],
) -> Vec<Action> {
    let current_rows = sheet.data_rows();
    let data_cols = sheet.data_cols();
    let shared = current_rows.min(replacement.len());
    let mut actions = Vec::new();

    for row in 0..shared {
        let current = sheet.row_values(store, row + 1);
        for col in 0..data_cols {
            let new_text = replacement[row].get(col).map(String::as_str).unwrap_or("");
            let old_text = current.get(col).map(String::as_str).unwrap_or("");
            if new_text != old_text {
                actions.push(Action::EditCell {
                    row: row + 1,
                    col: col + 1,
                    value: CellValue::text(new_text.to_string()),
                });
            }
        }
    }

    for (offset, row) in replacement.iter().enumerate().skip(shared) {
        let at = 1 + current_rows + (offset - shared);
        actions.push(Action::InsertRow { at });
        for (col, text) in row.iter().take(data_cols).enumerate() {
            if text.is_empty() {
                continue;
            }
            actions.push(Action::EditCell {
                row: at,
                col: col + 1,
                value: CellValue::text(text.clone()),
            });
        }
    }

    for row in shared..current_rows {
        actions.push(Action::DeleteRow { row: row + 1 });
    }
    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::apply_action;
    use crate::client::ScriptedClient;
    use crate::history::Piece;
    use crate::sheet::{Sheet, SheetDomain, SheetKind};

    fn seeded_session() -> Session {
        let mut session = Session::new();
        let mut sheet = Sheet::with_schema(
            &mut session.store,
            "Key Facts",
            None,
            &[("Fact".into(), None), ("Details".into(), None)],
            SheetKind::Dynamic,
            SheetDomain::Chat,
        );
        apply_action(&mut sheet, &mut session.store, &Action::InsertRow { at: 1 }).unwrap();
        for (col, text) in ["pet", "cat"].iter().enumerate() {
            let edit = Action::EditCell {
                row: 1,
                col: col + 1,
                value: CellValue::text(*text),
            };
            apply_action(&mut sheet, &mut session.store, &edit).unwrap();
        }
        session.sheets.insert(sheet.id.clone(), sheet);
        session.transcript.push(Piece::user("tell me about my pet"));
        session.transcript.push(Piece::assistant("you have a cat"));
        session
    }

    fn replacement_json() -> &'static str {
        r#"[{"tableName":"Key Facts","columns":["Fact","Details"],"content":[["pet","dog"],["job","baker"]]}]"#
    }

    #[tokio::test]
    async fn silent_rebuild_commits_and_keeps_history() {
        let mut session = seeded_session();
        let client = ScriptedClient::new([replacement_json()]);
        let options = RebuildOptions {
            silent: true,
            ..RebuildOptions::default()
        };
        let outcome = run_rebuild(
            &mut session,
            &ProfileLibrary::builtin(),
            &client,
            &CancelToken::new(),
            &options,
        )
        .await
        .unwrap();

        let RebuildOutcome::Committed(report) = outcome else {
            panic!("expected a committed rebuild");
        };
        assert_eq!(report.tables.len(), 1);
        assert_eq!(report.piece, Some(1));

        let sheet = session.sheets.values().next().unwrap();
        assert_eq!(sheet.data_rows(), 2);
        assert_eq!(sheet.row_values(&session.store, 1), vec!["pet", "dog"]);
        assert_eq!(sheet.row_values(&session.store, 2), vec!["job", "baker"]);

        // The edited cell kept its identity: "cat" survives in history.
        let edited = sheet.grid[1][2].clone();
        let cell = session.store.get(&edited).unwrap();
        assert_eq!(cell.history.last().unwrap().value.to_string(), "cat");

        assert!(session.transcript.get(1).unwrap().snapshot().is_some());
    }

    #[tokio::test]
    async fn cancelled_rebuild_discards_the_response() {
        let mut session = seeded_session();
        let client = ScriptedClient::new([replacement_json()]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let options = RebuildOptions {
            silent: true,
            ..RebuildOptions::default()
        };
        let err = run_rebuild(
            &mut session,
            &ProfileLibrary::builtin(),
            &client,
            &cancel,
            &options,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, SyncError::Cancelled));
        let sheet = session.sheets.values().next().unwrap();
        assert_eq!(sheet.data_rows(), 1);
        assert_eq!(sheet.row_values(&session.store, 1), vec!["pet", "cat"]);
    }

    #[tokio::test]
    async fn column_count_drift_is_rejected() {
        let mut session = seeded_session();
        let client = ScriptedClient::new([
            r#"[{"tableName":"Key Facts","columns":["Fact"],"content":[["pet"]]}]"#,
        ]);
        let err = run_rebuild(
            &mut session,
            &ProfileLibrary::builtin(),
            &client,
            &CancelToken::new(),
            &RebuildOptions::default(),
        )
        .await
        .unwrap_err();

        match err {
            SyncError::SchemaMismatch {
                what, expected, found, ..
            } => {
                assert_eq!(what, "columns");
                assert_eq!(expected, 2);
                assert_eq!(found, 1);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn op_list_responses_come_back_as_ops() {
        let mut session = seeded_session();
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
        .await
        .unwrap();

        let RebuildOutcome::Ops(ops) = outcome else {
            panic!("expected ops");
        };
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].table, 0);
    }

    #[tokio::test]
    async fn proposal_reports_the_delta_without_committing() {
        let mut session = seeded_session();
        let client = ScriptedClient::new([replacement_json()]);
        let outcome = run_rebuild(
            &mut session,
            &ProfileLibrary::builtin(),
            &client,
            &CancelToken::new(),
            &RebuildOptions::default(),
        )
        .await
        .unwrap();

        let RebuildOutcome::Proposed(proposal) = outcome else {
            panic!("expected a proposal");
        };
        assert_eq!(proposal.revisions.len(), 1);
        let delta = &proposal.revisions[0].delta;
        assert_eq!(delta.changed_cells, vec![(0, 1)]);
        assert_eq!(delta.added_rows, vec![1]);
        assert!(delta.removed_rows.is_empty());

        // Nothing moved until the proposal is committed.
        let sheet = session.sheets.values().next().unwrap();
        assert_eq!(sheet.data_rows(), 1);

        let report = commit_rebuild(&mut session, &proposal).unwrap();
        assert_eq!(report.tables.len(), 1);
        let sheet = session.sheets.values().next().unwrap();
        assert_eq!(sheet.data_rows(), 2);
    }
}
