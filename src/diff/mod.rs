mod hash;

pub use hash::{content_digest, row_signature};

use crate::ids::{CellId, SheetId};
use crate::sheet::Sheet;
use crate::store::CellStore;
use ahash::AHashMap;
use serde::Serialize;

/// By-value capture of a sheet at one point in time. Mutation paths take a
/// capture before applying actions; diffing against the live sheet afterwards
/// stays correct even though edited cells keep their ids.
#[derive(Debug, Clone, Serialize)]
pub struct ValueGrid {
    pub sheet: SheetId,
    pub name: String,
    pub ids: Vec<Vec<CellId>>,
    pub values: Vec<Vec<String>>,
}

impl ValueGrid {
    pub fn capture(sheet: &Sheet, store: &CellStore) -> Self {
        let values = sheet
            .grid
            .iter()
            .map(|row| {
                row.iter()
                    .map(|id| store.text_or_empty(id).to_string())
                    .collect()
            })
            .collect();
        ValueGrid {
            sheet: sheet.id.clone(),
            name: sheet.name(store),
            ids: sheet.grid.clone(),
            values,
        }
    }

    pub fn rows(&self) -> usize {
        self.ids.len()
    }

    pub fn cols(&self) -> usize {
        self.ids.first().map(|r| r.len()).unwrap_or(0)
    }

    /// Data-cell texts of one grid row (columns 1..).
    pub fn data_row(&self, row: usize) -> &[String] {
        match self.values.get(row) {
            Some(values) if !values.is_empty() => &values[1..],
            _ => &[],
        }
    }

    /// Signatures of every data row, for duplicate-insert suppression.
    pub fn row_signatures(&self) -> Vec<u64> {
        (1..self.rows())
            .map(|row| row_signature(self.data_row(row)))
            .collect()
    }
}

/// Identity-based delta between a capture and the live sheet. A cell id
/// absent from the capture was inserted; a shared id whose text changed was
/// updated. Deleted rows remove ids, so nothing downstream of a delete is
/// ever misreported as inserted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GridDelta {
    pub inserted: Vec<CellId>,
    pub updated: Vec<CellId>,
    pub inserted_rows: Vec<usize>,
    pub updated_cells: Vec<(usize, usize)>,
    pub removed: usize,
}

impl GridDelta {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.removed == 0
    }
}

pub fn diff_since(capture: &ValueGrid, sheet: &Sheet, store: &CellStore) -> GridDelta {
    let mut old_values: AHashMap<&CellId, &str> = AHashMap::new();
    for (row, ids) in capture.ids.iter().enumerate() {
        for (col, id) in ids.iter().enumerate() {
            old_values.insert(id, capture.values[row][col].as_str());
        }
    }

    let mut delta = GridDelta::default();
    let mut seen = 0usize;
    for (row, ids) in sheet.grid.iter().enumerate() {
        let mut row_is_new = true;
        for (col, id) in ids.iter().enumerate() {
            match old_values.get(id) {
                None => delta.inserted.push(id.clone()),
                Some(old_text) => {
                    row_is_new = false;
                    seen += 1;
                    if *old_text != store.text_or_empty(id) {
                        delta.updated.push(id.clone());
                        delta.updated_cells.push((row, col));
                    }
                }
            }
        }
        if row_is_new && !ids.is_empty() {
            delta.inserted_rows.push(row);
        }
    }
    delta.removed = old_values.len().saturating_sub(seen);
    delta
}

/// Position-based delta between captured data rows and a replacement set of
/// data rows. Used by full rebuilds, where new content has no cell identity
/// yet.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RowDelta {
    /// (data row index, data column index) pairs whose text differs.
    pub changed_cells: Vec<(usize, usize)>,
    /// Data row indices present only in the replacement.
    pub added_rows: Vec<usize>,
    /// Data row indices present only in the capture.
    pub removed_rows: Vec<usize>,
}

impl RowDelta {
    pub fn is_empty(&self) -> bool {
        self.changed_cells.is_empty() && self.added_rows.is_empty() && self.removed_rows.is_empty()
    }
}

pub fn diff_rows(capture: &ValueGrid, replacement: &[Vec<String>]) -> RowDelta {
    let old_rows = capture.rows().saturating_sub(1);
    let new_rows = replacement.len();
    let shared = old_rows.min(new_rows);

    let mut delta = RowDelta::default();
    for row in 0..shared {
        let old = capture.data_row(row + 1);
        let new = &replacement[row];
        let cols = old.len().max(new.len());
        for col in 0..cols {
            let old_text = old.get(col).map(String::as_str).unwrap_or("");
            let new_text = new.get(col).map(String::as_str).unwrap_or("");
            if old_text != new_text {
                delta.changed_cells.push((row, col));
            }
        }
    }
    delta.added_rows.extend(shared..new_rows);
    delta.removed_rows.extend(shared..old_rows);
    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, apply_action};
    use crate::cell::CellValue;
    use crate::sheet::{SheetDomain, SheetKind};

    fn sheet_with_rows(store: &mut CellStore, rows: &[&[&str]]) -> Sheet {
        let mut sheet = Sheet::with_schema(
            store,
            "Facts",
            None,
            &[("A".into(), None), ("B".into(), None)],
            SheetKind::Free,
            SheetDomain::Chat,
        );
        for (i, row) in rows.iter().enumerate() {
            apply_action(&mut sheet, store, &Action::InsertRow { at: i + 1 }).unwrap();
            for (j, text) in row.iter().enumerate() {
                apply_action(
                    &mut sheet,
                    store,
                    &Action::EditCell {
                        row: i + 1,
                        col: j + 1,
                        value: CellValue::text(*text),
                    },
                )
                .unwrap();
            }
        }
        sheet
    }

    #[test]
    fn diff_since_reports_inserts_and_updates() {
        let mut store = CellStore::new();
        let mut sheet = sheet_with_rows(&mut store, &[&["a1", "b1"]]);
        let capture = ValueGrid::capture(&sheet, &store);

        apply_action(&mut sheet, &mut store, &Action::InsertRow { at: 2 }).unwrap();
        apply_action(
            &mut sheet,
            &mut store,
            &Action::EditCell {
                row: 1,
                col: 1,
                value: CellValue::text("a1-edited"),
            },
        )
        .unwrap();

        let delta = diff_since(&capture, &sheet, &store);
        assert_eq!(delta.inserted_rows, vec![2]);
        assert_eq!(delta.inserted.len(), 3);
        assert_eq!(delta.updated_cells, vec![(1, 1)]);
        assert_eq!(delta.removed, 0);
    }

    #[test]
    fn deleting_a_row_marks_nothing_as_inserted() {
        let mut store = CellStore::new();
        let mut sheet = sheet_with_rows(&mut store, &[&["a1", "b1"], &["a2", "b2"], &["a3", "b3"]]);
        let capture = ValueGrid::capture(&sheet, &store);

        apply_action(&mut sheet, &mut store, &Action::DeleteRow { row: 2 }).unwrap();

        let delta = diff_since(&capture, &sheet, &store);
        assert!(delta.inserted.is_empty());
        assert!(delta.inserted_rows.is_empty());
        assert_eq!(delta.removed, 3);
    }

    #[test]
    fn diff_rows_compares_by_position() {
        let mut store = CellStore::new();
        let sheet = sheet_with_rows(&mut store, &[&["a1", "b1"], &["a2", "b2"]]);
        let capture = ValueGrid::capture(&sheet, &store);

        let replacement = vec![
            vec!["a1".to_string(), "b1-new".to_string()],
            vec!["a2".to_string(), "b2".to_string()],
            vec!["a3".to_string(), "b3".to_string()],
        ];
        let delta = diff_rows(&capture, &replacement);
        assert_eq!(delta.changed_cells, vec![(0, 1)]);
        assert_eq!(delta.added_rows, vec![2]);
        assert!(delta.removed_rows.is_empty());
    }
}
