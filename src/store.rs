use crate::cell::{Cell, CellRole, CellValue};
use crate::ids::{CellId, SheetId, derive_cell_id};
use ahash::AHashMap;
use rand::Rng;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Append-only cell pool shared by every sheet in a session. Cells are
/// addressed by content-derived id; structural removal evicts (tombstones)
/// rather than deletes, so older snapshots keep resolving.
#[derive(Debug, Clone)]
pub struct CellStore {
    cells: AHashMap<CellId, Cell>,
    salt: u64,
    seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub live: usize,
    pub evicted: usize,
    pub history_entries: usize,
}

impl CellStore {
    pub fn new() -> Self {
        CellStore {
            cells: AHashMap::new(),
            salt: rand::thread_rng().r#gen(),
            seq: 0,
        }
    }

    /// Allocates a cell and returns its id. Id collisions are resolved by
    /// advancing the sequence counter until an unused id falls out.
    pub fn allocate(
        &mut self,
        sheet: &SheetId,
        row: usize,
        col: usize,
        value: CellValue,
    ) -> CellId {
        let id = loop {
            let candidate = derive_cell_id(sheet, self.salt, self.seq, &value.text);
            self.seq += 1;
            if !self.cells.contains_key(&candidate) {
                break candidate;
            }
        };
        let cell = Cell {
            id: id.clone(),
            sheet: sheet.clone(),
            role: CellRole::for_position(row, col),
            row,
            col,
            value,
            history: Vec::new(),
            evicted: false,
        };
        self.cells.insert(id.clone(), cell);
        id
    }

    pub fn get(&self, id: &CellId) -> Option<&Cell> {
        self.cells.get(id)
    }

    pub fn get_mut(&mut self, id: &CellId) -> Option<&mut Cell> {
        self.cells.get_mut(id)
    }

    pub fn contains(&self, id: &CellId) -> bool {
        self.cells.contains_key(id)
    }

    /// Current display text for an id; empty string when the id is unknown.
    /// Rendering paths use this so one dangling reference degrades to a blank
    /// cell instead of failing a whole view.
    pub fn text_or_empty(&self, id: &CellId) -> &str {
        self.cells.get(id).map(|c| c.text()).unwrap_or("")
    }

    /// Marks a cell as structurally removed. The record and its history stay
    /// resolvable for older snapshots.
    pub fn evict(&mut self, id: &CellId) {
        if let Some(cell) = self.cells.get_mut(id) {
            cell.evicted = true;
        }
    }

    /// Clears the eviction mark, used when a cascade re-adopts a cell that a
    /// later snapshot still references.
    pub fn revive(&mut self, id: &CellId) {
        if let Some(cell) = self.cells.get_mut(id) {
            cell.evicted = false;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cell> {
        self.cells.values()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats {
            live: 0,
            evicted: 0,
            history_entries: 0,
        };
        for cell in self.cells.values() {
            if cell.evicted {
                stats.evicted += 1;
            } else {
                stats.live += 1;
            }
            stats.history_entries += cell.history.len();
        }
        stats
    }

    /// Drops cells no snapshot or sheet references any more. `referenced`
    /// must contain every id reachable from current grids and snapshots.
    pub fn sweep(&mut self, referenced: &ahash::AHashSet<CellId>) -> usize {
        let before = self.cells.len();
        self.cells
            .retain(|id, cell| !cell.evicted || referenced.contains(id));
        before - self.cells.len()
    }
}

impl Default for CellStore {
    fn default() -> Self {
        CellStore::new()
    }
}

impl Serialize for CellStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut cells: Vec<&Cell> = self.cells.values().collect();
        cells.sort_by(|a, b| a.id.cmp(&b.id));
        serializer.collect_seq(cells)
    }
}

impl<'de> Deserialize<'de> for CellStore {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let cells = Vec::<Cell>::deserialize(deserializer)?;
        let mut store = CellStore::new();
        store.seq = cells.len() as u64;
        store.cells = cells.into_iter().map(|c| (c.id.clone(), c)).collect();
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet() -> SheetId {
        SheetId("sheet_test".into())
    }

    #[test]
    fn allocate_assigns_unique_ids_for_equal_values() {
        let mut store = CellStore::new();
        let a = store.allocate(&sheet(), 1, 1, CellValue::text("same"));
        let b = store.allocate(&sheet(), 2, 1, CellValue::text("same"));
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn evicted_cells_stay_resolvable() {
        let mut store = CellStore::new();
        let id = store.allocate(&sheet(), 1, 1, CellValue::text("keep"));
        store.evict(&id);
        let cell = store.get(&id).unwrap();
        assert!(cell.evicted);
        assert_eq!(cell.text(), "keep");
        assert_eq!(store.stats().evicted, 1);
    }

    #[test]
    fn serde_round_trip_preserves_cells_and_history() {
        let mut store = CellStore::new();
        let id = store.allocate(&sheet(), 1, 1, CellValue::text("v1"));
        store
            .get_mut(&id)
            .unwrap()
            .record_value(CellValue::text("v2"));

        let json = serde_json::to_string(&store).unwrap();
        let restored: CellStore = serde_json::from_str(&json).unwrap();
        let cell = restored.get(&id).unwrap();
        assert_eq!(cell.text(), "v2");
        assert_eq!(cell.history.len(), 1);
    }

    #[test]
    fn sweep_keeps_referenced_tombstones() {
        let mut store = CellStore::new();
        let kept = store.allocate(&sheet(), 1, 1, CellValue::text("kept"));
        let dropped = store.allocate(&sheet(), 2, 1, CellValue::text("dropped"));
        store.evict(&kept);
        store.evict(&dropped);

        let mut referenced = ahash::AHashSet::new();
        referenced.insert(kept.clone());
        let removed = store.sweep(&referenced);
        assert_eq!(removed, 1);
        assert!(store.contains(&kept));
        assert!(!store.contains(&dropped));
    }
}
