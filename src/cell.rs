use crate::ids::{CellId, SheetId};
use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a cell is for. Determined by position at allocation and re-derived
/// whenever structural edits move the cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellRole {
    /// Grid corner (0,0). Holds the sheet's display name and prompt.
    Origin,
    /// Row 0, column >= 1. Holds a column title and optional column prompt.
    ColumnHeader,
    /// Column 0, row >= 1. Holds a generated row label.
    RowHeader,
    Data,
}

impl CellRole {
    pub fn for_position(row: usize, col: usize) -> Self {
        match (row, col) {
            (0, 0) => CellRole::Origin,
            (0, _) => CellRole::ColumnHeader,
            (_, 0) => CellRole::RowHeader,
            _ => CellRole::Data,
        }
    }

    pub fn is_header(&self) -> bool {
        !matches!(self, CellRole::Data)
    }
}

/// Cell payload. Data cells carry plain text; header cells may also carry a
/// description used when schemas are rendered into prompts.
///
/// Serializes as a bare string when only text is present, and as an object
/// otherwise, so exported documents stay compact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellValue {
    pub text: String,
    pub description: Option<String>,
}

impl CellValue {
    pub fn text(text: impl Into<String>) -> Self {
        CellValue {
            text: text.into(),
            description: None,
        }
    }

    pub fn with_description(text: impl Into<String>, description: impl Into<String>) -> Self {
        CellValue {
            text: text.into(),
            description: Some(description.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.description.is_none()
    }
}

impl From<&str> for CellValue {
    fn from(text: &str) -> Self {
        CellValue::text(text)
    }
}

impl From<String> for CellValue {
    fn from(text: String) -> Self {
        CellValue::text(text)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.description {
            None => serializer.serialize_str(&self.text),
            Some(desc) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("text", &self.text)?;
                map.serialize_entry("description", desc)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for CellValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = CellValue;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string or an object with text/description")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<CellValue, E> {
                Ok(CellValue::text(v))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<CellValue, A::Error> {
                let mut text: Option<String> = None;
                let mut description: Option<String> = None;
                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "text" => text = Some(map.next_value()?),
                        "description" => description = map.next_value()?,
                        _ => {
                            let _: serde::de::IgnoredAny = map.next_value()?;
                        }
                    }
                }
                Ok(CellValue {
                    text: text.unwrap_or_default(),
                    description,
                })
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub value: CellValue,
    pub recorded_at: DateTime<Utc>,
}

/// One versioned cell. Structural position is a cache of where the owning
/// sheet's current grid places the cell; snapshot grids remain authoritative
/// for older versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    pub id: CellId,
    pub sheet: SheetId,
    pub role: CellRole,
    pub row: usize,
    pub col: usize,
    pub value: CellValue,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryEntry>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub evicted: bool,
}

impl Cell {
    pub fn text(&self) -> &str {
        &self.value.text
    }

    /// Replaces the payload, pushing the prior payload onto the history
    /// stack. No-op when the new payload equals the current one.
    pub fn record_value(&mut self, value: CellValue) -> bool {
        if value == self.value {
            return false;
        }
        let prior = std::mem::replace(&mut self.value, value);
        self.history.push(HistoryEntry {
            value: prior,
            recorded_at: Utc::now(),
        });
        true
    }
}
