use crate::errors::{RepairError, Warning};
use crate::parse::edit_tag::{OpKind, TableOp, canonical_verb};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// One full-replacement table recovered from model output.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TablePayload {
    pub name: String,
    pub columns: Vec<String>,
    pub content: Vec<Vec<String>>,
}

/// What a repaired response turned out to contain.
#[derive(Debug)]
pub enum Repaired {
    Tables(Vec<TablePayload>),
    Ops(Vec<TableOp>),
}

static GREEDY_ARRAY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\[.*\]").expect("array regex"));
static JSON_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?(0|[1-9]\d*)(\.\d+)?([eE][+-]?\d+)?$").expect("number regex"));

/// Drops fence marker lines (``` with or without a language tag), keeping
/// the fenced content itself.
pub fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extracts the first balanced top-level `[...]` span. Falls back to a
/// greedy first-to-last bracket span when no balanced close exists.
pub fn extract_array(text: &str) -> Result<&str, RepairError> {
    if let Some(span) = balanced_array_span(text) {
        return Ok(span);
    }
    if let Some(found) = GREEDY_ARRAY.find(text) {
        return Ok(found.as_str());
    }
    let start = text.find('[').ok_or(RepairError::NoArrayFound)?;
    let end = text.rfind(']').ok_or(RepairError::NoArrayFound)?;
    if end > start {
        Ok(&text[start..=end])
    } else {
        Err(RepairError::NoArrayFound)
    }
}

fn balanced_array_span(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('[')?;
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = start;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == q {
                quote = None;
            }
        } else {
            match b {
                b'"' | b'\'' => quote = Some(b),
                b'[' | b'{' => depth += 1,
                b']' | b'}' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 && b == b']' {
                        return Some(&text[start..=i]);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

/// Removes `//` line comments and `/* */` block comments outside strings.
pub fn strip_comments(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut quote: Option<u8> = None;
    let mut i = 0usize;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == b'\\' && i + 1 < bytes.len() {
                out.push(bytes[i] as char);
                out.push(bytes[i + 1] as char);
                i += 2;
                continue;
            }
            if b == q {
                quote = None;
            }
            out.push(b as char);
        } else {
            match b {
                b'"' | b'\'' => {
                    quote = Some(b);
                    out.push(b as char);
                }
                b'/' if bytes.get(i + 1) == Some(&b'/') => {
                    while i < bytes.len() && bytes[i] != b'\n' {
                        i += 1;
                    }
                    continue;
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    i += 2;
                    while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                        i += 1;
                    }
                    i += 2;
                    continue;
                }
                _ => out.push(b as char),
            }
        }
        i += 1;
    }
    out
}

/// Rewrites almost-JSON into strict JSON: single-quoted strings become
/// double-quoted, unquoted keys gain quotes, bare scalar values gain quotes
/// (numbers, `true`/`false`/`null` stay bare), trailing commas before a
/// closer are dropped, and no-space `HH:MM` tokens are kept as time strings
/// instead of being split into a numeric key and value.
pub fn normalize_loose_json(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len() + 16);
    let mut i = 0usize;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'"' => {
                let end = copy_double_quoted(text, i, &mut out);
                i = end;
            }
            b'\'' => {
                let end = convert_single_quoted(text, i, &mut out);
                i = end;
            }
            b'{' | b'[' | b':' | b',' => {
                out.push(b as char);
                i += 1;
            }
            b'}' | b']' => {
                trim_trailing_comma(&mut out);
                out.push(b as char);
                i += 1;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 2;
            }
            _ if (b as char).is_whitespace() => {
                out.push(b as char);
                i += 1;
            }
            _ => {
                i = emit_bare_token(text, i, &mut out);
            }
        }
    }
    out
}

fn copy_double_quoted(text: &str, start: usize, out: &mut String) -> usize {
    let bytes = text.as_bytes();
    out.push('"');
    let mut i = start + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\\' && i + 1 < bytes.len() {
            out.push(bytes[i] as char);
            out.push(bytes[i + 1] as char);
            i += 2;
            continue;
        }
        if b == b'"' {
            out.push('"');
            return i + 1;
        }
        out.push(b as char);
        i += 1;
    }
    // Unterminated string: close it so the strict parser sees a value.
    out.push('"');
    i
}

fn convert_single_quoted(text: &str, start: usize, out: &mut String) -> usize {
    let bytes = text.as_bytes();
    out.push('"');
    let mut i = start + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\\' && bytes.get(i + 1) == Some(&b'\'') {
            out.push('\'');
            i += 2;
            continue;
        }
        if b == b'\\' && i + 1 < bytes.len() {
            out.push(bytes[i] as char);
            out.push(bytes[i + 1] as char);
            i += 2;
            continue;
        }
        if b == b'\'' {
            out.push('"');
            return i + 1;
        }
        if b == b'"' {
            out.push_str("\\\"");
            i += 1;
            continue;
        }
        out.push(b as char);
        i += 1;
    }
    out.push('"');
    i
}

fn trim_trailing_comma(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    if out[..trimmed_len].ends_with(',') {
        let tail: String = out[trimmed_len..].to_string();
        out.truncate(trimmed_len - 1);
        out.push_str(&tail);
    }
}

/// Consumes one bare token and emits its strict-JSON form. Returns the index
/// to resume scanning at.
fn emit_bare_token(text: &str, start: usize, out: &mut String) -> usize {
    let bytes = text.as_bytes();
    let mut i = start;
    while i < bytes.len() && !matches!(bytes[i], b',' | b':' | b'}' | b']') {
        i += 1;
    }
    let token = text[start..i].trim();

    // No-space digits:digits(2) is a time value, not a key/value split.
    if bytes.get(i) == Some(&b':')
        && token.len() <= 2
        && !token.is_empty()
        && token.bytes().all(|b| b.is_ascii_digit())
        && text[start..i].trim_end().len() == i - start
    {
        let minute_start = i + 1;
        let minute_end = minute_start + 2;
        if minute_end <= bytes.len()
            && bytes[minute_start..minute_end].iter().all(u8::is_ascii_digit)
            && bytes.get(minute_end).is_none_or(|b| !b.is_ascii_digit() && *b != b':')
        {
            out.push('"');
            out.push_str(token);
            out.push(':');
            out.push_str(&text[minute_start..minute_end]);
            out.push('"');
            return minute_end;
        }
    }

    if bytes.get(i) == Some(&b':') {
        // Key position.
        match serde_json::to_string(token) {
            Ok(quoted) => out.push_str(&quoted),
            Err(_) => out.push_str("\"\""),
        }
        return i;
    }

    // Value position.
    if token.is_empty() {
        return i;
    }
    if matches!(token, "true" | "false" | "null") || JSON_NUMBER.is_match(token) {
        out.push_str(token);
    } else {
        match serde_json::to_string(token) {
            Ok(quoted) => out.push_str(&quoted),
            Err(_) => out.push_str("\"\""),
        }
    }
    i
}

/// Full pipeline: fences, array extraction, strict parse with a loose-JSON
/// fallback pass. `expected_tables` enforces the minimum table cardinality
/// for full replacements; pass 0 to skip the check.
pub fn repair_response(raw: &str, expected_tables: usize) -> Result<(Repaired, Vec<Warning>), RepairError> {
    let defenced = strip_code_fences(raw);
    let span = extract_array(&defenced)?;

    let value: Value = match serde_json::from_str(span) {
        Ok(v) => v,
        Err(first_err) => {
            let cleaned = normalize_loose_json(&strip_comments(span));
            match serde_json::from_str(&cleaned) {
                Ok(v) => {
                    debug!(error = %first_err, "strict parse failed; loose normalization succeeded");
                    v
                }
                Err(second_err) => return Err(RepairError::Unparseable(second_err.to_string())),
            }
        }
    };

    let items = match value {
        Value::Array(items) => items,
        _ => return Err(RepairError::NoArrayFound),
    };

    let mut warnings = Vec::new();
    if let Some(ops) = decode_op_list(&items, &mut warnings) {
        return Ok((Repaired::Ops(ops), warnings));
    }

    let tables = decode_tables(items, &mut warnings)?;
    if expected_tables > 0 && tables.len() < expected_tables {
        return Err(RepairError::TableCountBelowMinimum {
            found: tables.len(),
            expected: expected_tables,
        });
    }
    Ok((Repaired::Tables(tables), warnings))
}

/// Decodes `{action, tableIndex, rowIndex?, data?}` objects. Returns `None`
/// unless every object in the array is op-shaped.
fn decode_op_list(items: &[Value], warnings: &mut Vec<Warning>) -> Option<Vec<TableOp>> {
    if items.is_empty() || !items.iter().all(|v| v.get("action").is_some()) {
        return None;
    }

    let mut ops = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let action = item.get("action").and_then(Value::as_str).unwrap_or("");
        let Some(kind) = canonical_verb(action) else {
            warnings.push(Warning::new(
                "WARN_OP_DROPPED",
                format!("op {index}: unknown action '{action}'"),
            ));
            continue;
        };
        let Some(table) = scalar_usize(item.get("tableIndex").or_else(|| item.get("table"))) else {
            warnings.push(Warning::new(
                "WARN_OP_DROPPED",
                format!("op {index}: missing table index"),
            ));
            continue;
        };
        let row = scalar_usize(item.get("rowIndex").or_else(|| item.get("row")));
        if matches!(kind, OpKind::UpdateRow | OpKind::DeleteRow) && row.is_none() {
            warnings.push(Warning::new(
                "WARN_OP_DROPPED",
                format!("op {index}: {kind} needs a row index"),
            ));
            continue;
        }

        let data = match item.get("data") {
            Some(Value::Object(map)) => {
                let mut out = BTreeMap::new();
                for (key, value) in map {
                    match key.trim().parse::<usize>() {
                        Ok(col) => {
                            out.insert(col, scalar_text(value));
                        }
                        Err(_) => warnings.push(Warning::new(
                            "WARN_DATA_KEY_DROPPED",
                            format!("op {index}: data key '{key}' is not a column index"),
                        )),
                    }
                }
                Some(out)
            }
            _ => None,
        };
        if kind != OpKind::DeleteRow && data.is_none() {
            warnings.push(Warning::new(
                "WARN_OP_DROPPED",
                format!("op {index}: {kind} needs a data object"),
            ));
            continue;
        }

        ops.push(TableOp {
            kind,
            table,
            row,
            data,
        });
    }
    Some(ops)
}

fn decode_tables(items: Vec<Value>, warnings: &mut Vec<Warning>) -> Result<Vec<TablePayload>, RepairError> {
    let mut tables = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let Value::Object(map) = item else {
            warnings.push(Warning::new(
                "WARN_TABLE_DROPPED",
                format!("entry {index} is not a table object"),
            ));
            continue;
        };

        let name = map
            .get("tableName")
            .or_else(|| map.get("name"))
            .map(scalar_text)
            .unwrap_or_else(|| format!("table {index}"));
        let columns: Vec<String> = match map.get("columns").or_else(|| map.get("headers")) {
            Some(Value::Array(cols)) => cols.iter().map(scalar_text).collect(),
            _ => {
                warnings.push(Warning::new(
                    "WARN_TABLE_DROPPED",
                    format!("table '{name}' has no columns array"),
                ));
                continue;
            }
        };

        let raw_rows = match map.get("content").or_else(|| map.get("rows")) {
            Some(Value::Array(rows)) => rows.clone(),
            _ => Vec::new(),
        };
        let mut content = Vec::with_capacity(raw_rows.len());
        for row in raw_rows {
            match row {
                Value::Array(cells) => {
                    let mut texts: Vec<String> = cells.iter().map(scalar_text).collect();
                    if texts.len() != columns.len() {
                        warnings.push(Warning::new(
                            "WARN_ROW_RESIZED",
                            format!(
                                "table '{name}': row resized from {} to {} cells",
                                texts.len(),
                                columns.len()
                            ),
                        ));
                        texts.resize(columns.len(), String::new());
                    }
                    content.push(texts);
                }
                other => {
                    warnings.push(Warning::new(
                        "WARN_ROW_DROPPED",
                        format!("table '{name}': row is {} rather than an array", kind_of(&other)),
                    ));
                }
            }
        }

        tables.push(TablePayload {
            name,
            columns,
            content,
        });
    }

    if tables.is_empty() {
        return Err(RepairError::NoTables);
    }
    Ok(tables)
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn scalar_usize(value: Option<&Value>) -> Option<usize> {
    match value? {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn recovers_table_from_fenced_loose_json() {
        let raw = "Here is the table:\n```json\n[{tableName:'T',columns:['A','B'],content:[[1,2]]}]\n```\nHope this helps!";
        let (repaired, _warnings) = repair_response(raw, 1).unwrap();
        let tables = assert_matches!(repaired, Repaired::Tables(t) => t);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "T");
        assert_eq!(tables[0].columns, vec!["A", "B"]);
        assert_eq!(tables[0].content, vec![vec!["1".to_string(), "2".to_string()]]);
    }

    #[test]
    fn extract_array_prefers_balanced_span() {
        let text = "noise [1, \"a]b\", 2] trailing ] bracket";
        assert_eq!(extract_array(text).unwrap(), "[1, \"a]b\", 2]");
    }

    #[test]
    fn missing_array_is_reported() {
        assert_matches!(extract_array("no brackets here"), Err(RepairError::NoArrayFound));
    }

    #[test]
    fn normalize_quotes_keys_values_and_protects_times() {
        let cleaned = normalize_loose_json("[{when: 14:30, who: Alice, n: 3,}]");
        let value: Value = serde_json::from_str(&cleaned).unwrap();
        assert_eq!(value[0]["when"], "14:30");
        assert_eq!(value[0]["who"], "Alice");
        assert_eq!(value[0]["n"], 3);
    }

    #[test]
    fn strip_comments_respects_strings() {
        let cleaned = strip_comments("[\"http://x\", 1] // tail\n/* gone */[2]");
        assert!(cleaned.contains("http://x"));
        assert!(!cleaned.contains("tail"));
        assert!(!cleaned.contains("gone"));
    }

    #[test]
    fn rows_are_coerced_to_column_count() {
        let raw = "[{\"tableName\":\"T\",\"columns\":[\"A\",\"B\"],\"content\":[[\"only\"],[\"x\",\"y\",\"extra\"]]}]";
        let (repaired, warnings) = repair_response(raw, 0).unwrap();
        let tables = assert_matches!(repaired, Repaired::Tables(t) => t);
        assert_eq!(tables[0].content[0], vec!["only", ""]);
        assert_eq!(tables[0].content[1], vec!["x", "y"]);
        assert_eq!(warnings.iter().filter(|w| w.code == "WARN_ROW_RESIZED").count(), 2);
    }

    #[test]
    fn too_few_tables_rejects_the_whole_response() {
        let raw = "[{\"tableName\":\"T\",\"columns\":[\"A\"],\"content\":[]}]";
        let err = repair_response(raw, 2).unwrap_err();
        assert_matches!(
            err,
            RepairError::TableCountBelowMinimum {
                found: 1,
                expected: 2
            }
        );
    }

    #[test]
    fn op_shaped_arrays_decode_as_ops() {
        let raw = "[{\"action\":\"insert\",\"tableIndex\":0,\"data\":{\"0\":\"Alice\",\"1\":28}},{\"action\":\"delete\",\"tableIndex\":1,\"rowIndex\":2}]";
        let (repaired, warnings) = repair_response(raw, 0).unwrap();
        let ops = assert_matches!(repaired, Repaired::Ops(o) => o);
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].kind, OpKind::InsertRow);
        assert_eq!(ops[0].data.as_ref().unwrap().get(&1).unwrap(), "28");
        assert_eq!(ops[1].kind, OpKind::DeleteRow);
        assert!(warnings.is_empty());
    }

    #[test]
    fn unterminated_strings_are_closed() {
        let cleaned = normalize_loose_json("[\"broken]");
        assert_eq!(cleaned, "[\"broken]\"");
        // Still unparseable, but reported as such rather than panicking.
        let raw = "[\"broken";
        assert!(matches!(
            repair_response(raw, 0),
            Err(RepairError::Unparseable(_)) | Err(RepairError::NoArrayFound)
        ));
    }
}
