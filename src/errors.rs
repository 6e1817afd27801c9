use crate::ids::{CellId, SheetId};
use crate::sheet::SheetKind;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Non-fatal normalization note surfaced alongside results.
#[derive(Debug, Clone, Serialize)]
pub struct Warning {
    pub code: String,
    pub message: String,
}

impl Warning {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Warning {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Row,
    Column,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Row => f.write_str("row"),
            Axis::Column => f.write_str("column"),
        }
    }
}

/// Rejection of a sheet mutation. These are surfaced per-action: one bad
/// action in a batch reports here while the rest of the batch proceeds.
#[derive(Debug, Error)]
pub enum MutationError {
    #[error("sheet '{sheet}' has kind {kind} which locks its {axis} structure")]
    StructureLocked {
        sheet: String,
        kind: SheetKind,
        axis: Axis,
    },
    #[error("sheet '{sheet}' has kind {kind} and cannot be edited")]
    ReadOnly { sheet: String, kind: SheetKind },
    #[error("{axis} 0 of sheet '{sheet}' holds headers and cannot be deleted")]
    HeaderDelete { sheet: String, axis: Axis },
    #[error("{axis} index {index} is out of range for sheet '{sheet}' (extent {extent})")]
    OutOfRange {
        sheet: String,
        axis: Axis,
        index: usize,
        extent: usize,
    },
    #[error("insert position {index} is out of range for sheet '{sheet}' (extent {extent})")]
    InsertOutOfRange {
        sheet: String,
        index: usize,
        extent: usize,
    },
    #[error("cell {id} referenced by sheet '{sheet}' is missing from the store")]
    MissingCell { sheet: String, id: CellId },
    #[error("sheet '{sheet}' grid is ragged at row {row} ({found} cells, expected {expected})")]
    RaggedGrid {
        sheet: String,
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("unknown sheet {0}")]
    UnknownSheet(SheetId),
}

/// Failure of the staged cleanup that turns raw model output into a JSON
/// table array. `Unparseable` carries the strict-parser message from the
/// final attempt so callers can log what survived every pass.
#[derive(Debug, Error)]
pub enum RepairError {
    #[error("no JSON array found in model response")]
    NoArrayFound,
    #[error("response is not valid JSON after cleanup: {0}")]
    Unparseable(String),
    #[error("response array holds no usable table objects")]
    NoTables,
    #[error("recovered {found} tables but at least {expected} are required")]
    TableCountBelowMinimum { found: usize, expected: usize },
}

/// Failure of a model-driven sync run. Mutation and repair failures are
/// wrapped so one error type crosses the pipeline boundary.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("model transport failed: {0}")]
    Transport(String),
    #[error("model returned an empty response")]
    EmptyResponse,
    #[error("sync cancelled before commit")]
    Cancelled,
    #[error("unknown prompt profile '{0}'")]
    UnknownProfile(String),
    #[error("session has no sheets eligible for rebuild")]
    NothingToRebuild,
    #[error("transcript has no message at index {0}")]
    UnknownPiece(usize),
    #[error("rebuild changed {what} for table '{table}': expected {expected}, got {found}")]
    SchemaMismatch {
        table: String,
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("rebuild returned table '{0}' which does not exist in this session")]
    UnknownTable(String),
    #[error(transparent)]
    Repair(#[from] RepairError),
    #[error(transparent)]
    Mutation(#[from] MutationError),
}
