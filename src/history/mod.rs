pub mod resolve;

pub use resolve::{Resolved, resolve_snapshot};

use crate::ids::{CellId, PieceId, SheetId};
use crate::sheet::Sheet;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum PieceRole {
    User,
    Assistant,
}

/// Immutable table-state capture attached to one swipe: every sheet's grid
/// of cell ids as of that message. Later state changes produce new snapshots
/// on later messages; existing snapshots are never edited.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    pub sheets: IndexMap<SheetId, Vec<Vec<CellId>>>,
}

impl Snapshot {
    pub fn from_sheets<'a>(sheets: impl IntoIterator<Item = &'a Sheet>) -> Self {
        let mut snapshot = Snapshot::default();
        for sheet in sheets {
            snapshot.sheets.insert(sheet.id.clone(), sheet.grid.clone());
        }
        snapshot
    }

    pub fn grid(&self, sheet: &SheetId) -> Option<&Vec<Vec<CellId>>> {
        self.sheets.get(sheet)
    }

    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }

    pub fn cell_ids(&self) -> impl Iterator<Item = &CellId> {
        self.sheets
            .values()
            .flat_map(|grid| grid.iter())
            .flat_map(|row| row.iter())
    }
}

/// One alternative body of a message. Swipes carry their own snapshots so
/// switching the selected alternative also switches table state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Swipe {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,
}

/// One message in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Piece {
    pub id: PieceId,
    pub role: PieceRole,
    pub swipes: Vec<Swipe>,
    #[serde(default)]
    pub selected: usize,
    /// Set when this message was regenerated from scratch. A regenerated
    /// message owns its snapshot outright, so cascades from earlier edits
    /// stop here instead of overwriting it.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub regenerated: bool,
}

impl Piece {
    pub fn user(text: impl Into<String>) -> Self {
        Piece {
            id: PieceId::generate(),
            role: PieceRole::User,
            swipes: vec![Swipe {
                text: text.into(),
                snapshot: None,
            }],
            selected: 0,
            regenerated: false,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Piece {
            id: PieceId::generate(),
            role: PieceRole::Assistant,
            swipes: vec![Swipe {
                text: text.into(),
                snapshot: None,
            }],
            selected: 0,
            regenerated: false,
        }
    }

    fn selected_swipe(&self) -> Option<&Swipe> {
        self.swipes.get(self.selected)
    }

    pub fn text(&self) -> &str {
        self.selected_swipe().map(|s| s.text.as_str()).unwrap_or("")
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        if let Some(swipe) = self.swipes.get_mut(self.selected) {
            swipe.text = text.into();
        }
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.selected_swipe().and_then(|s| s.snapshot.as_ref())
    }

    pub fn set_snapshot(&mut self, snapshot: Snapshot) {
        if let Some(swipe) = self.swipes.get_mut(self.selected) {
            swipe.snapshot = Some(snapshot);
        }
    }

    pub fn clear_snapshot(&mut self) {
        if let Some(swipe) = self.swipes.get_mut(self.selected) {
            swipe.snapshot = None;
        }
    }

    /// Adds an alternative body and selects it.
    pub fn add_swipe(&mut self, text: impl Into<String>) {
        self.swipes.push(Swipe {
            text: text.into(),
            snapshot: None,
        });
        self.selected = self.swipes.len() - 1;
    }

    /// Selects an existing alternative. Out-of-range indices clamp to the
    /// last swipe rather than failing, matching how branch switching behaves
    /// when alternatives were pruned.
    pub fn select_swipe(&mut self, index: usize) {
        self.selected = index.min(self.swipes.len().saturating_sub(1));
    }
}

/// Ordered message sequence of one session, oldest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    pub pieces: Vec<Piece>,
}

impl Transcript {
    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn push(&mut self, piece: Piece) -> usize {
        self.pieces.push(piece);
        self.pieces.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&Piece> {
        self.pieces.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Piece> {
        self.pieces.iter()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Piece> {
        self.pieces.get_mut(index)
    }

    pub fn index_of(&self, id: &PieceId) -> Option<usize> {
        self.pieces.iter().position(|p| &p.id == id)
    }

    pub fn last_index(&self) -> Option<usize> {
        self.pieces.len().checked_sub(1)
    }

    /// Index of the newest assistant message, if any.
    pub fn last_assistant_index(&self) -> Option<usize> {
        self.pieces
            .iter()
            .rposition(|p| p.role == PieceRole::Assistant)
    }

    /// Number of assistant messages in `(after, until]`, used to decide
    /// whether per-sheet update thresholds have been reached.
    pub fn assistant_count_between(&self, after: Option<usize>, until: usize) -> usize {
        if self.pieces.is_empty() {
            return 0;
        }
        let start = after.map(|i| i + 1).unwrap_or(0);
        let end = until.min(self.pieces.len() - 1);
        if start > end {
            return 0;
        }
        self.pieces[start..=end]
            .iter()
            .filter(|p| p.role == PieceRole::Assistant)
            .count()
    }
}
