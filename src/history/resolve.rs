use crate::errors::MutationError;
use crate::history::Transcript;
use crate::ids::SheetId;
use crate::sheet::Sheet;
use crate::store::CellStore;
use crate::template::TemplateSet;
use indexmap::IndexMap;
use tracing::{debug, warn};

/// Result of resolving table state at a point in the transcript.
#[derive(Debug)]
pub struct Resolved {
    /// Hydrated working copies, in registry order.
    pub sheets: Vec<Sheet>,
    /// Index of the piece whose snapshot supplied the state; `None` when the
    /// state came from fresh template instances.
    pub source: Option<usize>,
}

/// Walks backward from `at_index` (inclusive when `include_at`) to the
/// nearest piece whose selected swipe carries a snapshot, and hydrates every
/// sheet in it. Messages without snapshots (user turns in particular) are
/// skipped, so an unanswered user message still resolves to the latest
/// model-authored state. When no snapshot exists at all, registry sheets
/// come back with their data rows cleared (pre-first-message state, ids
/// preserved); an empty registry falls back to fresh template instances.
pub fn resolve_snapshot(
    transcript: &Transcript,
    at_index: usize,
    include_at: bool,
    registry: &IndexMap<SheetId, Sheet>,
    templates: &TemplateSet,
    store: &mut CellStore,
) -> Result<Resolved, MutationError> {
    // Scan pieces strictly below `end`, newest first.
    let end = if include_at {
        at_index.saturating_add(1).min(transcript.len())
    } else {
        at_index.min(transcript.len())
    };

    for index in (0..end).rev() {
        let Some(piece) = transcript.get(index) else {
            continue;
        };
        let Some(snapshot) = piece.snapshot() else {
            continue;
        };

        let mut sheets = Vec::with_capacity(snapshot.sheets.len());
        for (sheet_id, sheet) in registry {
            let Some(grid) = snapshot.grid(sheet_id) else {
                continue;
            };
            let mut hydrated = sheet.clone();
            hydrated.grid = grid.clone();
            hydrated.clear_markers();
            hydrated.validate(store)?;
            sheets.push(hydrated);
        }
        for sheet_id in snapshot.sheets.keys() {
            if !registry.contains_key(sheet_id) {
                warn!(%sheet_id, "snapshot references a sheet no longer in the session; skipping");
            }
        }
        debug!(source = index, sheets = sheets.len(), "snapshot resolved");
        return Ok(Resolved {
            sheets,
            source: Some(index),
        });
    }

    let sheets = if registry.is_empty() {
        let sheets = templates.instantiate_all(store);
        debug!(sheets = sheets.len(), "no snapshot found; instantiated templates");
        sheets
    } else {
        // Keep ids and schema; only the data rows are younger than any
        // snapshot.
        let sheets = registry
            .values()
            .map(|sheet| {
                let mut cleared = sheet.clone();
                cleared.grid.truncate(1);
                cleared.clear_markers();
                cleared
            })
            .collect::<Vec<_>>();
        debug!(sheets = sheets.len(), "no snapshot found; cleared registry sheets");
        sheets
    };
    Ok(Resolved {
        sheets,
        source: None,
    })
}
