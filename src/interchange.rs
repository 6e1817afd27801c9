use crate::cell::{CellValue, HistoryEntry};
use crate::errors::Warning;
use crate::ids::SheetId;
use crate::sheet::{Sheet, SheetConfig, SheetDomain, SheetKind};
use crate::store::CellStore;
use anyhow::{Result, bail, ensure};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub const DOCUMENT_TYPE: &str = "memsheet/tables";
/// Version 1 was the flat tableIndex/rowIndex layout; this crate reads and
/// writes only the hash-grid layout introduced with version 2.
pub const DOCUMENT_VERSION: u32 = 2;

/// Portable form of a set of sheets: cells are exported by value and
/// position, so cell ids are regenerated on import while values, shape, and
/// per-cell history survive exactly.
#[derive(Debug, Serialize, Deserialize)]
pub struct TableDocument {
    pub document: String,
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub sheets: IndexMap<SheetId, SheetExport>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SheetExport {
    pub kind: SheetKind,
    pub domain: SheetDomain,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_template: bool,
    #[serde(default)]
    pub config: SheetConfig,
    pub grid: Vec<Vec<CellExport>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CellExport {
    pub value: CellValue,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug)]
pub struct ImportResult {
    pub sheets: Vec<Sheet>,
    pub warnings: Vec<Warning>,
}

pub fn export_document<'a>(
    sheets: impl IntoIterator<Item = &'a Sheet>,
    store: &CellStore,
) -> TableDocument {
    let mut exported = IndexMap::new();
    for sheet in sheets {
        let grid = sheet
            .grid
            .iter()
            .map(|row| {
                row.iter()
                    .map(|id| match store.get(id) {
                        Some(cell) => CellExport {
                            value: cell.value.clone(),
                            history: cell.history.clone(),
                        },
                        None => CellExport {
                            value: CellValue::default(),
                            history: Vec::new(),
                        },
                    })
                    .collect()
            })
            .collect();
        exported.insert(
            sheet.id.clone(),
            SheetExport {
                kind: sheet.kind,
                domain: sheet.domain,
                is_template: sheet.is_template,
                config: sheet.config.clone(),
                grid,
            },
        );
    }
    TableDocument {
        document: DOCUMENT_TYPE.to_string(),
        version: DOCUMENT_VERSION,
        exported_at: Utc::now(),
        sheets: exported,
    }
}

/// Rebuilds sheets from a document, allocating fresh cell ids in `store`.
/// Shape violations fail the whole import; nothing is allocated for a sheet
/// until its grid has been checked.
pub fn import_document(document: TableDocument, store: &mut CellStore) -> Result<ImportResult> {
    ensure!(
        document.document == DOCUMENT_TYPE,
        "unrecognized document type '{}'",
        document.document
    );
    if document.version != DOCUMENT_VERSION {
        bail!(
            "document version {} is not supported; only version {} (hash-grid layout) can be imported",
            document.version,
            DOCUMENT_VERSION
        );
    }

    let mut warnings = Vec::new();
    let mut sheets = Vec::with_capacity(document.sheets.len());
    for (sheet_id, export) in document.sheets {
        let rows = export.grid.len();
        ensure!(rows >= 1, "sheet '{sheet_id}' has no header row");
        let cols = export.grid[0].len();
        ensure!(cols >= 1, "sheet '{sheet_id}' has no header column");
        for (row, cells) in export.grid.iter().enumerate() {
            ensure!(
                cells.len() == cols,
                "sheet '{sheet_id}' is ragged at row {row} ({} cells, expected {cols})",
                cells.len()
            );
        }

        let id = if store.iter().any(|cell| cell.sheet == sheet_id) {
            let fresh = SheetId::generate();
            warnings.push(Warning::new(
                "WARN_SHEET_ID_TAKEN",
                format!("sheet '{sheet_id}' already exists; imported as '{fresh}'"),
            ));
            fresh
        } else {
            sheet_id
        };

        let grid = export
            .grid
            .into_iter()
            .enumerate()
            .map(|(row, cells)| {
                cells
                    .into_iter()
                    .enumerate()
                    .map(|(col, cell)| {
                        let cell_id = store.allocate(&id, row, col, cell.value);
                        if !cell.history.is_empty()
                            && let Some(stored) = store.get_mut(&cell_id)
                        {
                            stored.history = cell.history;
                        }
                        cell_id
                    })
                    .collect()
            })
            .collect();

        sheets.push(Sheet {
            id,
            kind: export.kind,
            domain: export.domain,
            is_template: export.is_template,
            template: None,
            grid,
            config: export.config,
            markers: Default::default(),
        });
    }

    Ok(ImportResult { sheets, warnings })
}
