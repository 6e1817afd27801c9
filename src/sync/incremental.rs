use crate::action::Outcome;
use crate::errors::SyncError;
use crate::history::{Snapshot, resolve_snapshot};
use crate::parse::edit_tag::{TableOp, parse_edit_tag, rewrite_tag};
use crate::session::Session;
use crate::sync::{OpBatchReport, apply_ops_to_sheets};
use crate::template::TemplateSet;
use serde::Serialize;
use tracing::{debug, info};

/// Result of committing one message's edits, including everything the
/// commit dragged along: downstream snapshots recomputed because they were
/// derived from the edited state.
#[derive(Debug, Serialize)]
pub struct PieceCommit {
    pub piece: usize,
    /// Piece whose snapshot supplied the pre-edit state, when one existed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<usize>,
    #[serde(flatten)]
    pub report: OpBatchReport,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cascaded: Vec<usize>,
}

/// Parses the edit tag in a message's selected swipe and commits its
/// operations: resolve the state before the message, apply, snapshot the
/// result onto the swipe, and reprocess any downstream snapshots that were
/// derived from this point. The tag text is rewritten into canonical form
/// unless it held statements that could not be parsed (those stay visible
/// as written).
pub fn commit_piece_edits(
    session: &mut Session,
    templates: &TemplateSet,
    piece_index: usize,
) -> Result<PieceCommit, SyncError> {
    let piece = session
        .transcript
        .get(piece_index)
        .ok_or(SyncError::UnknownPiece(piece_index))?;
    let text = piece.text().to_string();

    let parse = parse_edit_tag(&text);
    let ops = parse.ops();
    let rewrite = parse.rejected_count() == 0;
    let (source, mut report) = commit_at(session, templates, piece_index, &ops, rewrite)?;

    let mut warnings = parse.warnings;
    warnings.append(&mut report.warnings);
    report.warnings = warnings;

    let cascaded = cascade_reprocess(session, templates, piece_index)?;
    refresh_registry(session, templates)?;
    session.touch();

    info!(
        piece = piece_index,
        applied = report.applied(),
        skipped = report.skipped(),
        rejected = report.rejected(),
        cascaded = cascaded.len(),
        "edits committed"
    );
    Ok(PieceCommit {
        piece: piece_index,
        source,
        report,
        cascaded,
    })
}

/// Commits an externally produced operation list against a message, exactly
/// as if the message had carried it in an edit tag. The canonical tag text
/// is appended to the message so the state stays derivable from the
/// transcript alone.
pub fn commit_ops(
    session: &mut Session,
    templates: &TemplateSet,
    piece_index: usize,
    ops: Vec<TableOp>,
) -> Result<PieceCommit, SyncError> {
    let (source, report) = commit_at(session, templates, piece_index, &ops, true)?;
    let cascaded = cascade_reprocess(session, templates, piece_index)?;
    refresh_registry(session, templates)?;
    session.touch();
    Ok(PieceCommit {
        piece: piece_index,
        source,
        report,
        cascaded,
    })
}

/// Runs a message's operations against a throwaway copy of the state.
/// Reports come back with `Planned` in place of `Applied`; the session is
/// untouched.
pub fn dry_run_piece(
    session: &Session,
    templates: &TemplateSet,
    piece_index: usize,
) -> Result<PieceCommit, SyncError> {
    let piece = session
        .transcript
        .get(piece_index)
        .ok_or(SyncError::UnknownPiece(piece_index))?;
    let parse = parse_edit_tag(piece.text());
    let ops = parse.ops();

    let mut store = session.store.clone();
    let resolved = resolve_snapshot(
        &session.transcript,
        piece_index,
        false,
        &session.sheets,
        templates,
        &mut store,
    )?;
    let mut sheets = resolved.sheets;
    let mut report = apply_ops_to_sheets(&mut sheets, &mut store, &ops);

    for entry in &mut report.reports {
        if let Outcome::Applied { row } = entry.outcome {
            entry.outcome = Outcome::Planned { row };
        }
    }
    let mut warnings = parse.warnings;
    warnings.append(&mut report.warnings);
    report.warnings = warnings;

    Ok(PieceCommit {
        piece: piece_index,
        source: resolved.source,
        report,
        cascaded: Vec::new(),
    })
}

/// Adds a regenerated body as a new swipe, marks the piece as independently
/// regenerated so upstream cascades stop here, and commits its edits.
pub fn record_regenerated(
    session: &mut Session,
    templates: &TemplateSet,
    piece_index: usize,
    text: impl Into<String>,
) -> Result<PieceCommit, SyncError> {
    let piece = session
        .transcript
        .get_mut(piece_index)
        .ok_or(SyncError::UnknownPiece(piece_index))?;
    piece.add_swipe(text.into());
    piece.regenerated = true;
    commit_piece_edits(session, templates, piece_index)
}

/// Switches a message to another swipe and brings the current state in line
/// with that branch. A swipe that never had its edits committed gets them
/// committed now; one that did just has its snapshot re-resolved into the
/// registry. Downstream snapshots are left alone either way.
pub fn switch_swipe(
    session: &mut Session,
    templates: &TemplateSet,
    piece_index: usize,
    swipe: usize,
) -> Result<Option<PieceCommit>, SyncError> {
    let piece = session
        .transcript
        .get_mut(piece_index)
        .ok_or(SyncError::UnknownPiece(piece_index))?;
    piece.select_swipe(swipe);

    if piece.snapshot().is_none() {
        let commit = commit_piece_edits(session, templates, piece_index)?;
        return Ok(Some(commit));
    }
    refresh_registry(session, templates)?;
    session.touch();
    Ok(None)
}

/// Recomputes every downstream snapshot derived from `after`, in order,
/// stopping at the first independently regenerated message. User turns and
/// other snapshot-less pieces pass through untouched.
pub fn cascade_reprocess(
    session: &mut Session,
    templates: &TemplateSet,
    after: usize,
) -> Result<Vec<usize>, SyncError> {
    let mut cascaded = Vec::new();
    for index in (after + 1)..session.transcript.len() {
        let Some(piece) = session.transcript.get(index) else {
            break;
        };
        if piece.regenerated {
            debug!(piece = index, "cascade stopped at regenerated message");
            break;
        }
        if piece.snapshot().is_none() {
            continue;
        }
        let text = piece.text().to_string();
        let parse = parse_edit_tag(&text);
        let ops = parse.ops();
        let rewrite = parse.rejected_count() == 0;
        commit_at(session, templates, index, &ops, rewrite)?;
        cascaded.push(index);
    }
    Ok(cascaded)
}

/// Resolves the state before `index`, applies `ops`, and writes the result
/// back: snapshot onto the selected swipe, working sheets into the
/// registry, canonical tag text into the message when `rewrite`.
fn commit_at(
    session: &mut Session,
    templates: &TemplateSet,
    index: usize,
    ops: &[TableOp],
    rewrite: bool,
) -> Result<(Option<usize>, OpBatchReport), SyncError> {
    if session.transcript.get(index).is_none() {
        return Err(SyncError::UnknownPiece(index));
    }

    let resolved = resolve_snapshot(
        &session.transcript,
        index,
        false,
        &session.sheets,
        templates,
        &mut session.store,
    )?;
    let mut working = resolved.sheets;
    let report = apply_ops_to_sheets(&mut working, &mut session.store, ops);

    let snapshot = Snapshot::from_sheets(working.iter());
    let piece = session
        .transcript
        .get_mut(index)
        .ok_or(SyncError::UnknownPiece(index))?;
    piece.set_snapshot(snapshot);
    if rewrite {
        let text = piece.text().to_string();
        piece.set_text(rewrite_tag(&text, ops));
    }

    for sheet in working {
        session.sheets.insert(sheet.id.clone(), sheet);
    }
    Ok((resolved.source, report))
}

/// Re-resolves the end-of-transcript state into the registry. Needed after
/// cascades that stop early and after branch switches, where the newest
/// snapshot is not the one just written.
fn refresh_registry(session: &mut Session, templates: &TemplateSet) -> Result<(), SyncError> {
    let resolved = resolve_snapshot(
        &session.transcript,
        session.transcript.len(),
        false,
        &session.sheets,
        templates,
        &mut session.store,
    )?;
    for sheet in resolved.sheets {
        session.sheets.insert(sheet.id.clone(), sheet);
    }
    Ok(())
}
