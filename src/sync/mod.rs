pub mod incremental;
pub mod rebuild;

pub use incremental::{PieceCommit, commit_ops, commit_piece_edits, dry_run_piece};
pub use rebuild::{RebuildOptions, RebuildOutcome, RebuildProposal, commit_rebuild, run_rebuild};

use crate::action::{Action, ChangeSet, Outcome, apply_action};
use crate::cell::CellValue;
use crate::diff::row_signature;
use crate::errors::Warning;
use crate::history::Transcript;
use crate::ids::{CellId, SheetId};
use crate::parse::edit_tag::{OpKind, TableOp};
use crate::sheet::{Marker, Sheet};
use crate::store::CellStore;
use ahash::AHashSet;
use serde::Serialize;
use tracing::debug;

/// Result of one wire operation against the working set.
#[derive(Debug, Clone, Serialize)]
pub struct OpReport {
    pub index: usize,
    pub op: TableOp,
    /// Sheet the table index resolved to, when it resolved at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheet: Option<SheetId>,
    pub outcome: Outcome,
}

#[derive(Debug, Default, Serialize)]
pub struct OpBatchReport {
    pub reports: Vec<OpReport>,
    /// Per-sheet aggregate of what actually changed, in working-set order.
    pub changes: Vec<(SheetId, ChangeSet)>,
    pub warnings: Vec<Warning>,
}

impl OpBatchReport {
    pub fn applied(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Applied { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Skipped { .. }))
            .count()
    }

    pub fn rejected(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Rejected { .. }))
            .count()
    }

    pub fn sheets_changed(&self) -> usize {
        self.changes.iter().filter(|(_, c)| !c.is_empty()).count()
    }
}

/// Projects an op's data map onto the sheet's data columns. Keys beyond the
/// column extent are dropped with a warning; missing keys become empty text.
fn project_data_row(
    op_index: usize,
    data: Option<&std::collections::BTreeMap<usize, String>>,
    data_cols: usize,
    warnings: &mut Vec<Warning>,
) -> Vec<String> {
    let mut row = vec![String::new(); data_cols];
    if let Some(map) = data {
        for (key, value) in map {
            if *key < data_cols {
                row[*key] = value.clone();
            } else {
                warnings.push(Warning::new(
                    "WARN_DATA_KEY_DROPPED",
                    format!("op {op_index}: data column {key} exceeds table width {data_cols}"),
                ));
            }
        }
    }
    row
}

/// Signatures of the sheet's current data rows. Recomputed per insert so
/// earlier ops in the same batch are always visible to the check.
fn live_signatures(sheet: &Sheet, store: &CellStore) -> Vec<u64> {
    (1..sheet.rows())
        .map(|row| row_signature(&sheet.row_values(store, row)))
        .collect()
}

/// Applies a wire-op batch to the working set. Non-delete ops run in
/// declaration order; row deletes are held back and run last, descending per
/// sheet, so deletes never shift each other's targets. Inserts whose content
/// matches an existing row are skipped, not applied twice. One bad op is
/// reported and the rest proceed.
pub fn apply_ops_to_sheets(
    sheets: &mut [Sheet],
    store: &mut CellStore,
    ops: &[TableOp],
) -> OpBatchReport {
    let mut warnings = Vec::new();
    let mut outcomes: Vec<Option<(Option<SheetId>, Outcome)>> = vec![None; ops.len()];
    let mut changes: Vec<ChangeSet> = sheets.iter().map(|_| ChangeSet::default()).collect();
    // (op index, sheet index, grid row)
    let mut pending_deletes: Vec<(usize, usize, usize)> = Vec::new();

    for (index, op) in ops.iter().enumerate() {
        let Some(sheet) = sheets.get_mut(op.table) else {
            outcomes[index] = Some((
                None,
                Outcome::Rejected {
                    reason: format!(
                        "table index {} out of range ({} tables)",
                        op.table,
                        sheets.len()
                    ),
                },
            ));
            continue;
        };
        let sheet_id = sheet.id.clone();

        let outcome = match op.kind {
            OpKind::InsertRow => {
                let data_row =
                    project_data_row(index, op.data.as_ref(), sheet.data_cols(), &mut warnings);
                let signature = row_signature(&data_row);
                let duplicate = live_signatures(sheet, store)
                    .iter()
                    .position(|s| *s == signature);
                if let Some(existing) = duplicate {
                    Outcome::Skipped {
                        reason: format!("duplicate of existing row {existing}"),
                    }
                } else {
                    insert_filled_row(sheet, store, &data_row, &mut changes[op.table])
                        .map(|row| Outcome::Applied {
                            row: Some(row.saturating_sub(1)),
                        })
                        .unwrap_or_else(|reason| Outcome::Rejected { reason })
                }
            }
            OpKind::UpdateRow => match op.row {
                None => Outcome::Rejected {
                    reason: "updateRow requires a row index".to_string(),
                },
                Some(data_row) => {
                    update_row(sheet, store, data_row, op.data.as_ref(), &mut changes[op.table])
                        .map(|_| Outcome::Applied {
                            row: Some(data_row),
                        })
                        .unwrap_or_else(|reason| Outcome::Rejected { reason })
                }
            },
            OpKind::DeleteRow => match op.row {
                None => Outcome::Rejected {
                    reason: "deleteRow requires a row index".to_string(),
                },
                Some(data_row) => {
                    pending_deletes.push((index, op.table, data_row + 1));
                    let placeholder = Outcome::Applied {
                        row: Some(data_row),
                    };
                    outcomes[index] = Some((Some(sheet_id), placeholder));
                    continue;
                }
            },
        };
        outcomes[index] = Some((Some(sheet_id), outcome));
    }

    // Deletes run last. Descending per sheet keeps every remaining target
    // index valid; exact repeats collapse to a skip.
    pending_deletes.sort_by(|a, b| a.1.cmp(&b.1).then(b.2.cmp(&a.2)));
    let mut last_deleted: Option<(usize, usize)> = None;
    for (index, table, grid_row) in pending_deletes {
        if last_deleted == Some((table, grid_row)) {
            outcomes[index] = Some((
                Some(sheets[table].id.clone()),
                Outcome::Skipped {
                    reason: format!("duplicate delete of row {}", grid_row - 1),
                },
            ));
            warnings.push(Warning::new(
                "WARN_DUPLICATE_DELETE",
                format!("dropped repeated delete of row {}", grid_row - 1),
            ));
            continue;
        }
        last_deleted = Some((table, grid_row));
        let sheet = &mut sheets[table];
        let outcome = match apply_action(sheet, store, &Action::DeleteRow { row: grid_row }) {
            Ok(change) => {
                changes[table].merge(change);
                Outcome::Applied {
                    row: Some(grid_row - 1),
                }
            }
            Err(err) => Outcome::Rejected {
                reason: err.to_string(),
            },
        };
        outcomes[index] = Some((Some(sheet.id.clone()), outcome));
    }

    for (sheet, change) in sheets.iter_mut().zip(changes.iter()) {
        mark_changes(sheet, change);
    }

    let reports = ops
        .iter()
        .cloned()
        .enumerate()
        .map(|(index, op)| {
            let (sheet, outcome) = outcomes[index].take().unwrap_or((
                None,
                Outcome::Rejected {
                    reason: "op was never evaluated".to_string(),
                },
            ));
            OpReport {
                index,
                op,
                sheet,
                outcome,
            }
        })
        .collect();

    let changes = sheets
        .iter()
        .zip(changes)
        .map(|(sheet, change)| (sheet.id.clone(), change))
        .collect();
    OpBatchReport {
        reports,
        changes,
        warnings,
    }
}

/// Appends a row and fills it. The whole op is one unit: if the insert is
/// rejected no cells are written.
fn insert_filled_row(
    sheet: &mut Sheet,
    store: &mut CellStore,
    data_row: &[String],
    changes: &mut ChangeSet,
) -> Result<usize, String> {
    let at = sheet.rows();
    let change =
        apply_action(sheet, store, &Action::InsertRow { at }).map_err(|e| e.to_string())?;
    changes.merge(change);
    for (col, text) in data_row.iter().enumerate() {
        if text.is_empty() {
            continue;
        }
        let edit = Action::EditCell {
            row: at,
            col: col + 1,
            value: CellValue::text(text.clone()),
        };
        let change = apply_action(sheet, store, &edit).map_err(|e| e.to_string())?;
        changes.merge(change);
    }
    debug!(sheet = %sheet.id, row = at, "row inserted");
    Ok(at)
}

fn update_row(
    sheet: &mut Sheet,
    store: &mut CellStore,
    data_row: usize,
    data: Option<&std::collections::BTreeMap<usize, String>>,
    changes: &mut ChangeSet,
) -> Result<(), String> {
    let grid_row = data_row + 1;
    if grid_row >= sheet.rows() {
        return Err(format!(
            "row {data_row} out of range ({} data rows)",
            sheet.data_rows()
        ));
    }
    let Some(map) = data else {
        return Err("updateRow requires a data object".to_string());
    };
    let data_cols = sheet.data_cols();
    for (key, value) in map {
        if *key >= data_cols {
            // Out-of-range keys write nothing; the rest of the op proceeds.
            continue;
        }
        let edit = Action::EditCell {
            row: grid_row,
            col: key + 1,
            value: CellValue::text(value.clone()),
        };
        let change = apply_action(sheet, store, &edit).map_err(|e| e.to_string())?;
        changes.merge(change);
    }
    Ok(())
}

/// Re-derives the change highlights from an applied change set. Cells no
/// longer present in the grid (inserted then deleted in one batch) are left
/// unmarked.
fn mark_changes(sheet: &mut Sheet, changes: &ChangeSet) {
    if changes.is_empty() {
        return;
    }
    let live: AHashSet<&CellId> = sheet.grid.iter().flatten().collect();
    let added: Vec<CellId> = changes
        .added
        .iter()
        .filter(|id| live.contains(id))
        .cloned()
        .collect();
    let edited: Vec<CellId> = changes
        .edited
        .iter()
        .filter(|id| live.contains(id))
        .cloned()
        .collect();
    for id in added {
        sheet.mark(id, Marker::Inserted);
    }
    for id in edited {
        sheet.mark(id, Marker::Updated);
    }
}

/// Whether the session-wide auto-sync threshold has been reached: at least
/// `every_n` assistant messages since the newest snapshot. Zero disables.
pub fn auto_sync_due(transcript: &Transcript, every_n: u32) -> bool {
    if every_n == 0 {
        return false;
    }
    let Some(last) = transcript.last_index() else {
        return false;
    };
    let last_snapshot = (0..=last).rev().find(|i| {
        transcript
            .get(*i)
            .and_then(|p| p.snapshot())
            .is_some()
    });
    let since = transcript.assistant_count_between(last_snapshot, last);
    since >= every_n as usize
}

/// Whether one sheet should be offered for updates this round, given how
/// many assistant messages have passed since its last update.
pub fn sheet_due(config: &crate::sheet::SheetConfig, messages_since: usize) -> bool {
    match config.update_every_n {
        None | Some(0) | Some(1) => true,
        Some(n) => messages_since >= n as usize,
    }
}
