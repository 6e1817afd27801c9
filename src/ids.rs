use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Stable identity of one cell. Derived from content at allocation time and
/// never reused, so snapshot grids can reference cells across versions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SheetId(pub String);

/// Identity of one transcript entry (a "piece"). Survives swipes and edits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PieceId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for SheetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for PieceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl SheetId {
    pub fn generate() -> Self {
        SheetId(format!("sheet_{}", short_token(12)))
    }
}

impl PieceId {
    pub fn generate() -> Self {
        PieceId(uuid::Uuid::new_v4().simple().to_string())
    }
}

impl SessionId {
    pub fn generate() -> Self {
        SessionId(format!("mem_{}", short_token(12)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives a cell id from its allocation context. The sequence number makes
/// ids unique even when the same value lands in the same sheet twice; the
/// salt keeps ids from colliding across stores loaded from disk.
pub fn derive_cell_id(sheet: &SheetId, salt: u64, seq: u64, value: &str) -> CellId {
    let mut hasher = Sha256::new();
    hasher.update(sheet.0.as_bytes());
    hasher.update(salt.to_le_bytes());
    hasher.update(seq.to_le_bytes());
    hasher.update(value.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(16);
    for byte in &digest[0..8] {
        out.push_str(&format!("{byte:02x}"));
    }
    CellId(out)
}

fn short_token(len: usize) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_ids_differ_by_sequence() {
        let sheet = SheetId("sheet_abc".into());
        let a = derive_cell_id(&sheet, 7, 0, "Alice");
        let b = derive_cell_id(&sheet, 7, 1, "Alice");
        assert_ne!(a, b);
        assert_eq!(a.0.len(), 16);
    }

    #[test]
    fn derived_ids_are_deterministic() {
        let sheet = SheetId("sheet_abc".into());
        assert_eq!(
            derive_cell_id(&sheet, 1, 2, "x"),
            derive_cell_id(&sheet, 1, 2, "x")
        );
    }

    #[test]
    fn generated_sheet_ids_carry_prefix() {
        let id = SheetId::generate();
        assert!(id.0.starts_with("sheet_"));
    }
}
