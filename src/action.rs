use crate::cell::CellValue;
use crate::errors::{Axis, MutationError, Warning};
use crate::ids::CellId;
use crate::sheet::Sheet;
use crate::store::CellStore;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// The only sanctioned way to mutate a sheet. Indices are grid coordinates:
/// row 0 and column 0 are headers, so the smallest legal structural index
/// is 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Action {
    /// Insert an empty row so that it becomes grid row `at`.
    InsertRow { at: usize },
    /// Insert an empty column so that it becomes grid column `at`.
    InsertColumn { at: usize },
    DeleteRow { row: usize },
    DeleteColumn { col: usize },
    EditCell {
        row: usize,
        col: usize,
        value: CellValue,
    },
}

impl Action {
    pub fn is_delete(&self) -> bool {
        matches!(self, Action::DeleteRow { .. } | Action::DeleteColumn { .. })
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Action::InsertRow { .. } => "insert_row",
            Action::InsertColumn { .. } => "insert_column",
            Action::DeleteRow { .. } => "delete_row",
            Action::DeleteColumn { .. } => "delete_column",
            Action::EditCell { .. } => "edit_cell",
        }
    }
}

/// What one action (or a whole batch) touched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChangeSet {
    pub added: Vec<CellId>,
    pub edited: Vec<CellId>,
    pub evicted: Vec<CellId>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inserted_rows: Vec<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inserted_cols: Vec<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deleted_rows: Vec<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deleted_cols: Vec<usize>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.edited.is_empty() && self.evicted.is_empty()
    }

    pub fn merge(&mut self, other: ChangeSet) {
        self.added.extend(other.added);
        self.edited.extend(other.edited);
        self.evicted.extend(other.evicted);
        self.inserted_rows.extend(other.inserted_rows);
        self.inserted_cols.extend(other.inserted_cols);
        self.deleted_rows.extend(other.deleted_rows);
        self.deleted_cols.extend(other.deleted_cols);
    }
}

/// Applies one action, enforcing the sheet-kind gates. Structural changes
/// evict rather than delete cells and reindex survivors afterwards.
pub fn apply_action(
    sheet: &mut Sheet,
    store: &mut CellStore,
    action: &Action,
) -> Result<ChangeSet, MutationError> {
    if !sheet.kind.allows_edits() {
        return Err(MutationError::ReadOnly {
            sheet: sheet.name(store),
            kind: sheet.kind,
        });
    }

    let mut changes = ChangeSet::default();
    match action {
        Action::InsertRow { at } => {
            require_structure(sheet, store, Axis::Row)?;
            let rows = sheet.rows();
            if *at < 1 || *at > rows {
                return Err(MutationError::InsertOutOfRange {
                    sheet: sheet.name(store),
                    index: *at,
                    extent: rows,
                });
            }
            let cols = sheet.cols();
            let mut ids = Vec::with_capacity(cols);
            for col in 0..cols {
                let id = store.allocate(&sheet.id, *at, col, CellValue::default());
                changes.added.push(id.clone());
                ids.push(id);
            }
            sheet.grid.insert(*at, ids);
            changes.inserted_rows.push(*at);
        }
        Action::InsertColumn { at } => {
            if !sheet.kind.allows_column_structure() {
                return Err(MutationError::StructureLocked {
                    sheet: sheet.name(store),
                    kind: sheet.kind,
                    axis: Axis::Column,
                });
            }
            let cols = sheet.cols();
            if *at < 1 || *at > cols {
                return Err(MutationError::InsertOutOfRange {
                    sheet: sheet.name(store),
                    index: *at,
                    extent: cols,
                });
            }
            for (row, ids) in sheet.grid.iter_mut().enumerate() {
                let id = store.allocate(&sheet.id, row, *at, CellValue::default());
                changes.added.push(id.clone());
                ids.insert(*at, id);
            }
            changes.inserted_cols.push(*at);
        }
        Action::DeleteRow { row } => {
            require_structure(sheet, store, Axis::Row)?;
            if *row == 0 {
                return Err(MutationError::HeaderDelete {
                    sheet: sheet.name(store),
                    axis: Axis::Row,
                });
            }
            let rows = sheet.rows();
            if *row >= rows {
                return Err(MutationError::OutOfRange {
                    sheet: sheet.name(store),
                    axis: Axis::Row,
                    index: *row,
                    extent: rows,
                });
            }
            let removed = sheet.grid.remove(*row);
            for id in removed {
                store.evict(&id);
                changes.evicted.push(id);
            }
            changes.deleted_rows.push(*row);
        }
        Action::DeleteColumn { col } => {
            if !sheet.kind.allows_column_structure() {
                return Err(MutationError::StructureLocked {
                    sheet: sheet.name(store),
                    kind: sheet.kind,
                    axis: Axis::Column,
                });
            }
            if *col == 0 {
                return Err(MutationError::HeaderDelete {
                    sheet: sheet.name(store),
                    axis: Axis::Column,
                });
            }
            let cols = sheet.cols();
            if *col >= cols {
                return Err(MutationError::OutOfRange {
                    sheet: sheet.name(store),
                    axis: Axis::Column,
                    index: *col,
                    extent: cols,
                });
            }
            for ids in sheet.grid.iter_mut() {
                let id = ids.remove(*col);
                store.evict(&id);
                changes.evicted.push(id);
            }
            changes.deleted_cols.push(*col);
        }
        Action::EditCell { row, col, value } => {
            let rows = sheet.rows();
            if *row >= rows {
                return Err(MutationError::OutOfRange {
                    sheet: sheet.name(store),
                    axis: Axis::Row,
                    index: *row,
                    extent: rows,
                });
            }
            let cols = sheet.cols();
            if *col >= cols {
                return Err(MutationError::OutOfRange {
                    sheet: sheet.name(store),
                    axis: Axis::Column,
                    index: *col,
                    extent: cols,
                });
            }
            let id = sheet.grid[*row][*col].clone();
            let cell = store.get_mut(&id).ok_or_else(|| MutationError::MissingCell {
                sheet: sheet.id.0.clone(),
                id: id.clone(),
            })?;
            if cell.record_value(value.clone()) {
                changes.edited.push(id);
            }
        }
    }

    if action.is_delete() || matches!(action, Action::InsertRow { .. } | Action::InsertColumn { .. })
    {
        sheet.reindex(store);
    }
    Ok(changes)
}

fn require_structure(sheet: &Sheet, store: &CellStore, axis: Axis) -> Result<(), MutationError> {
    if sheet.kind.allows_row_structure() {
        Ok(())
    } else {
        Err(MutationError::StructureLocked {
            sheet: sheet.name(store),
            kind: sheet.kind,
            axis,
        })
    }
}

/// Outcome of one action inside a batch, keyed by declaration index.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Applied {
        #[serde(skip_serializing_if = "Option::is_none")]
        row: Option<usize>,
    },
    Planned {
        #[serde(skip_serializing_if = "Option::is_none")]
        row: Option<usize>,
    },
    Skipped {
        reason: String,
    },
    Rejected {
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionReport {
    pub index: usize,
    pub action: Action,
    pub outcome: Outcome,
}

#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub reports: Vec<ActionReport>,
    pub changes: ChangeSet,
    pub warnings: Vec<Warning>,
}

impl BatchReport {
    pub fn applied(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Applied { .. }))
            .count()
    }

    pub fn rejected(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Rejected { .. }))
            .count()
    }
}

/// Reorders a batch into execution order: non-deletes first in declaration
/// order, then deletes in descending index order so earlier deletes cannot
/// shift the targets of later ones. Exact duplicate deletes collapse to one.
pub fn normalize_batch(actions: Vec<Action>) -> (Vec<(usize, Action)>, Vec<Warning>) {
    let mut warnings = Vec::new();
    let mut front: Vec<(usize, Action)> = Vec::new();
    let mut row_deletes: Vec<(usize, usize)> = Vec::new();
    let mut col_deletes: Vec<(usize, usize)> = Vec::new();

    for (index, action) in actions.into_iter().enumerate() {
        match action {
            Action::DeleteRow { row } => {
                if row_deletes.iter().any(|(_, r)| *r == row) {
                    warnings.push(Warning::new(
                        "WARN_DUPLICATE_DELETE",
                        format!("dropped repeated delete of row {row}"),
                    ));
                } else {
                    row_deletes.push((index, row));
                }
            }
            Action::DeleteColumn { col } => {
                if col_deletes.iter().any(|(_, c)| *c == col) {
                    warnings.push(Warning::new(
                        "WARN_DUPLICATE_DELETE",
                        format!("dropped repeated delete of column {col}"),
                    ));
                } else {
                    col_deletes.push((index, col));
                }
            }
            other => front.push((index, other)),
        }
    }

    let had_deletes = !row_deletes.is_empty() || !col_deletes.is_empty();
    row_deletes.sort_by(|a, b| b.1.cmp(&a.1));
    col_deletes.sort_by(|a, b| b.1.cmp(&a.1));

    let mut ordered = front;
    ordered.extend(
        row_deletes
            .into_iter()
            .map(|(i, row)| (i, Action::DeleteRow { row })),
    );
    ordered.extend(
        col_deletes
            .into_iter()
            .map(|(i, col)| (i, Action::DeleteColumn { col })),
    );

    if had_deletes {
        let reordered = ordered.windows(2).any(|pair| pair[0].0 > pair[1].0);
        if reordered {
            warnings.push(Warning::new(
                "WARN_BATCH_REORDERED",
                "deletes moved after inserts/edits and sorted descending",
            ));
        }
    }
    (ordered, warnings)
}

/// Applies a batch in normalized order. One rejected action does not abort
/// the rest; per-action outcomes come back in declaration order.
pub fn apply_batch(sheet: &mut Sheet, store: &mut CellStore, actions: Vec<Action>) -> BatchReport {
    let (ordered, warnings) = normalize_batch(actions);
    let mut reports: Vec<ActionReport> = Vec::with_capacity(ordered.len());
    let mut changes = ChangeSet::default();

    for (index, action) in ordered {
        let outcome = match apply_action(sheet, store, &action) {
            Ok(change) => {
                let row = change
                    .inserted_rows
                    .first()
                    .or(change.deleted_rows.first())
                    .copied();
                changes.merge(change);
                Outcome::Applied { row }
            }
            Err(err) => {
                debug!(action = action.verb(), error = %err, "action rejected");
                Outcome::Rejected {
                    reason: err.to_string(),
                }
            }
        };
        reports.push(ActionReport {
            index,
            action,
            outcome,
        });
    }

    reports.sort_by_key(|r| r.index);
    BatchReport {
        reports,
        changes,
        warnings,
    }
}

#[derive(Debug, Serialize)]
pub struct DryRunReport {
    pub reports: Vec<ActionReport>,
    pub rows_after: usize,
    pub cols_after: usize,
    pub warnings: Vec<Warning>,
}

/// Simulates a batch against the sheet's current shape without touching the
/// store. Planned outcomes carry the row index each insert would land on,
/// assigned in declaration order exactly as a real apply would assign them.
pub fn dry_run_batch(sheet: &Sheet, store: &CellStore, actions: Vec<Action>) -> DryRunReport {
    let (ordered, warnings) = normalize_batch(actions);
    let mut rows = sheet.rows();
    let mut cols = sheet.cols();
    let mut reports: Vec<ActionReport> = Vec::with_capacity(ordered.len());

    for (index, action) in ordered {
        let outcome = match simulate(sheet, store, &action, &mut rows, &mut cols) {
            Ok(row) => Outcome::Planned { row },
            Err(err) => Outcome::Rejected {
                reason: err.to_string(),
            },
        };
        reports.push(ActionReport {
            index,
            action,
            outcome,
        });
    }

    reports.sort_by_key(|r| r.index);
    DryRunReport {
        reports,
        rows_after: rows,
        cols_after: cols,
        warnings,
    }
}

fn simulate(
    sheet: &Sheet,
    store: &CellStore,
    action: &Action,
    rows: &mut usize,
    cols: &mut usize,
) -> Result<Option<usize>, MutationError> {
    if !sheet.kind.allows_edits() {
        return Err(MutationError::ReadOnly {
            sheet: sheet.name(store),
            kind: sheet.kind,
        });
    }
    match action {
        Action::InsertRow { at } => {
            require_structure(sheet, store, Axis::Row)?;
            if *at < 1 || *at > *rows {
                return Err(MutationError::InsertOutOfRange {
                    sheet: sheet.name(store),
                    index: *at,
                    extent: *rows,
                });
            }
            *rows += 1;
            Ok(Some(*at))
        }
        Action::InsertColumn { at } => {
            if !sheet.kind.allows_column_structure() {
                return Err(MutationError::StructureLocked {
                    sheet: sheet.name(store),
                    kind: sheet.kind,
                    axis: Axis::Column,
                });
            }
            if *at < 1 || *at > *cols {
                return Err(MutationError::InsertOutOfRange {
                    sheet: sheet.name(store),
                    index: *at,
                    extent: *cols,
                });
            }
            *cols += 1;
            Ok(None)
        }
        Action::DeleteRow { row } => {
            require_structure(sheet, store, Axis::Row)?;
            if *row == 0 {
                return Err(MutationError::HeaderDelete {
                    sheet: sheet.name(store),
                    axis: Axis::Row,
                });
            }
            if *row >= *rows {
                return Err(MutationError::OutOfRange {
                    sheet: sheet.name(store),
                    axis: Axis::Row,
                    index: *row,
                    extent: *rows,
                });
            }
            *rows -= 1;
            Ok(Some(*row))
        }
        Action::DeleteColumn { col } => {
            if !sheet.kind.allows_column_structure() {
                return Err(MutationError::StructureLocked {
                    sheet: sheet.name(store),
                    kind: sheet.kind,
                    axis: Axis::Column,
                });
            }
            if *col == 0 {
                return Err(MutationError::HeaderDelete {
                    sheet: sheet.name(store),
                    axis: Axis::Column,
                });
            }
            if *col >= *cols {
                return Err(MutationError::OutOfRange {
                    sheet: sheet.name(store),
                    axis: Axis::Column,
                    index: *col,
                    extent: *cols,
                });
            }
            *cols -= 1;
            Ok(None)
        }
        Action::EditCell { row, col, .. } => {
            if *row >= *rows {
                return Err(MutationError::OutOfRange {
                    sheet: sheet.name(store),
                    axis: Axis::Row,
                    index: *row,
                    extent: *rows,
                });
            }
            if *col >= *cols {
                return Err(MutationError::OutOfRange {
                    sheet: sheet.name(store),
                    axis: Axis::Column,
                    index: *col,
                    extent: *cols,
                });
            }
            Ok(None)
        }
    }
}
