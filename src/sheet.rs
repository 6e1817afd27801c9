use crate::cell::{CellRole, CellValue};
use crate::errors::MutationError;
use crate::ids::{CellId, SheetId};
use crate::store::CellStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Structural contract of a sheet. Checked before every mutation; the kind
/// never changes after instantiation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SheetKind {
    /// Rows and columns may both change.
    Free,
    /// Rows may change; the column set is part of the schema.
    Dynamic,
    /// Shape is locked; cell payloads may still be edited.
    Fixed,
    /// Fully read-only.
    Static,
}

impl SheetKind {
    pub fn allows_row_structure(&self) -> bool {
        matches!(self, SheetKind::Free | SheetKind::Dynamic)
    }

    pub fn allows_column_structure(&self) -> bool {
        matches!(self, SheetKind::Free)
    }

    pub fn allows_edits(&self) -> bool {
        !matches!(self, SheetKind::Static)
    }
}

/// Which scope a sheet (or its template) belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SheetDomain {
    Chat,
    Persona,
    Global,
}

fn default_true() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

/// Per-sheet behavior knobs. Everything here is advisory; none of it affects
/// the mutation rules, which follow from [`SheetKind`] alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetConfig {
    /// Render this sheet into assembled prompts.
    #[serde(skip_serializing_if = "is_true")]
    pub include_in_prompt: bool,
    /// Only offer this sheet for incremental updates every N assistant
    /// messages. `None` means every message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_every_n: Option<u32>,
    /// Free-form rendering hint carried through exports untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Default for SheetConfig {
    fn default() -> Self {
        SheetConfig {
            include_in_prompt: true,
            update_every_n: None,
            display_style: None,
            note: None,
        }
    }
}

/// Change highlight attached to a cell after the most recent sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Marker {
    Inserted,
    Updated,
}

/// A grid of cell ids plus schema metadata. The grid always contains a
/// header row (row 0) and a header column (column 0); the origin cell at
/// (0,0) holds the sheet's display name and prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sheet {
    pub id: SheetId,
    pub kind: SheetKind,
    pub domain: SheetDomain,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_template: bool,
    /// Template this sheet was instantiated from, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<SheetId>,
    pub grid: Vec<Vec<CellId>>,
    #[serde(default)]
    pub config: SheetConfig,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub markers: BTreeMap<CellId, Marker>,
}

impl Sheet {
    /// Builds a sheet with a populated header row and no data rows.
    /// `columns` holds (title, prompt) pairs for the data columns.
    pub fn with_schema(
        store: &mut CellStore,
        name: &str,
        prompt: Option<&str>,
        columns: &[(String, Option<String>)],
        kind: SheetKind,
        domain: SheetDomain,
    ) -> Self {
        let id = SheetId::generate();
        let origin = match prompt {
            Some(p) => CellValue::with_description(name, p),
            None => CellValue::text(name),
        };
        let mut header = vec![store.allocate(&id, 0, 0, origin)];
        for (col, (title, desc)) in columns.iter().enumerate() {
            let value = match desc {
                Some(d) => CellValue::with_description(title.clone(), d.clone()),
                None => CellValue::text(title.clone()),
            };
            header.push(store.allocate(&id, 0, col + 1, value));
        }
        Sheet {
            id,
            kind,
            domain,
            is_template: false,
            template: None,
            grid: vec![header],
            config: SheetConfig::default(),
            markers: BTreeMap::new(),
        }
    }

    pub fn rows(&self) -> usize {
        self.grid.len()
    }

    pub fn cols(&self) -> usize {
        self.grid.first().map(|r| r.len()).unwrap_or(0)
    }

    /// Data rows exclude the header row.
    pub fn data_rows(&self) -> usize {
        self.rows().saturating_sub(1)
    }

    /// Data columns exclude the header column.
    pub fn data_cols(&self) -> usize {
        self.cols().saturating_sub(1)
    }

    pub fn cell_at(&self, row: usize, col: usize) -> Option<&CellId> {
        self.grid.get(row).and_then(|r| r.get(col))
    }

    /// Display name, read from the origin cell.
    pub fn name(&self, store: &CellStore) -> String {
        match self.cell_at(0, 0) {
            Some(id) => {
                let text = store.text_or_empty(id);
                if text.is_empty() {
                    self.id.0.clone()
                } else {
                    text.to_string()
                }
            }
            None => self.id.0.clone(),
        }
    }

    /// Sheet-level prompt, read from the origin cell's description.
    pub fn prompt<'a>(&self, store: &'a CellStore) -> Option<&'a str> {
        let id = self.cell_at(0, 0)?;
        store.get(id)?.value.description.as_deref()
    }

    /// Column titles for data columns (grid columns 1..).
    pub fn column_titles(&self, store: &CellStore) -> Vec<String> {
        match self.grid.first() {
            Some(header) => header
                .iter()
                .skip(1)
                .map(|id| store.text_or_empty(id).to_string())
                .collect(),
            None => Vec::new(),
        }
    }

    /// (title, prompt) pairs for data columns, used for schema rendering.
    pub fn column_schema(&self, store: &CellStore) -> Vec<(String, Option<String>)> {
        match self.grid.first() {
            Some(header) => header
                .iter()
                .skip(1)
                .map(|id| match store.get(id) {
                    Some(cell) => (cell.text().to_string(), cell.value.description.clone()),
                    None => (String::new(), None),
                })
                .collect(),
            None => Vec::new(),
        }
    }

    /// Data-cell texts of one grid row (grid columns 1..).
    pub fn row_values(&self, store: &CellStore, row: usize) -> Vec<String> {
        match self.grid.get(row) {
            Some(ids) => ids
                .iter()
                .skip(1)
                .map(|id| store.text_or_empty(id).to_string())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Rejects ragged grids and dangling cell references.
    pub fn validate(&self, store: &CellStore) -> Result<(), MutationError> {
        let expected = self.cols();
        for (row, ids) in self.grid.iter().enumerate() {
            if ids.len() != expected {
                return Err(MutationError::RaggedGrid {
                    sheet: self.name(store),
                    row,
                    found: ids.len(),
                    expected,
                });
            }
            for id in ids {
                if !store.contains(id) {
                    return Err(MutationError::MissingCell {
                        sheet: self.name(store),
                        id: id.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Rewrites cached positions and roles after structural changes so that
    /// every live cell agrees with where the grid currently puts it.
    pub fn reindex(&self, store: &mut CellStore) {
        for (row, ids) in self.grid.iter().enumerate() {
            for (col, id) in ids.iter().enumerate() {
                if let Some(cell) = store.get_mut(id) {
                    cell.row = row;
                    cell.col = col;
                    cell.role = CellRole::for_position(row, col);
                }
            }
        }
    }

    pub fn clear_markers(&mut self) {
        self.markers.clear();
    }

    pub fn mark(&mut self, id: CellId, marker: Marker) {
        // Inserted wins over Updated when both apply to one cell.
        match self.markers.get(&id) {
            Some(Marker::Inserted) => {}
            _ => {
                self.markers.insert(id, marker);
            }
        }
    }

    /// True when `row` holds exactly `values` in its data columns.
    pub fn row_matches(&self, store: &CellStore, row: usize, values: &[String]) -> bool {
        if row == 0 || row >= self.rows() {
            return false;
        }
        let current = self.row_values(store, row);
        current.len() == values.len() && current.iter().zip(values).all(|(a, b)| a == b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_sheet(store: &mut CellStore) -> Sheet {
        Sheet::with_schema(
            store,
            "People",
            Some("track every named character"),
            &[
                ("Name".into(), Some("display name".into())),
                ("Age".into(), None),
            ],
            SheetKind::Dynamic,
            SheetDomain::Chat,
        )
    }

    #[test]
    fn schema_constructor_builds_header_row() {
        let mut store = CellStore::new();
        let sheet = make_sheet(&mut store);
        assert_eq!(sheet.rows(), 1);
        assert_eq!(sheet.cols(), 3);
        assert_eq!(sheet.name(&store), "People");
        assert_eq!(sheet.prompt(&store), Some("track every named character"));
        assert_eq!(sheet.column_titles(&store), vec!["Name", "Age"]);
    }

    #[test]
    fn validate_flags_ragged_grids() {
        let mut store = CellStore::new();
        let mut sheet = make_sheet(&mut store);
        let stray = store.allocate(&sheet.id, 1, 0, CellValue::text(""));
        sheet.grid.push(vec![stray]);
        assert!(matches!(
            sheet.validate(&store),
            Err(MutationError::RaggedGrid { row: 1, .. })
        ));
    }

    #[test]
    fn kind_gates_match_structure_rules() {
        assert!(SheetKind::Free.allows_column_structure());
        assert!(!SheetKind::Dynamic.allows_column_structure());
        assert!(SheetKind::Dynamic.allows_row_structure());
        assert!(!SheetKind::Fixed.allows_row_structure());
        assert!(SheetKind::Fixed.allows_edits());
        assert!(!SheetKind::Static.allows_edits());
    }

    #[test]
    fn inserted_marker_is_not_downgraded() {
        let mut store = CellStore::new();
        let mut sheet = make_sheet(&mut store);
        let id = sheet.cell_at(0, 1).unwrap().clone();
        sheet.mark(id.clone(), Marker::Inserted);
        sheet.mark(id.clone(), Marker::Updated);
        assert_eq!(sheet.markers.get(&id), Some(&Marker::Inserted));
        let _ = store;
    }
}
