use crate::errors::Warning;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::trace;

/// Tag that carries pseudo-call edit statements inside generated text.
pub const EDIT_TAG: &str = "tableEdit";

static TAG_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<tableEdit[^>]*>(.*?)</\s*tableEdit\s*>").expect("tag regex")
});

/// Canonical wire verbs. Synonyms and case variants are folded into these
/// during parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum OpKind {
    InsertRow,
    UpdateRow,
    DeleteRow,
}

/// One parsed wire operation. `table` indexes the sheet list shown to the
/// model; `data` maps data-column indices (0-based, header column excluded)
/// to replacement text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableOp {
    pub kind: OpKind,
    pub table: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<BTreeMap<usize, String>>,
}

/// One statement found in a tag block. Malformed statements are retained for
/// display instead of being dropped, and never abort their siblings.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Statement {
    Executable { raw: String, op: TableOp },
    NotExecutable { raw: String, reason: String },
}

impl Statement {
    pub fn raw(&self) -> &str {
        match self {
            Statement::Executable { raw, .. } | Statement::NotExecutable { raw, .. } => raw,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct EditTagParse {
    pub statements: Vec<Statement>,
    pub warnings: Vec<Warning>,
}

impl EditTagParse {
    pub fn ops(&self) -> Vec<TableOp> {
        self.statements
            .iter()
            .filter_map(|s| match s {
                Statement::Executable { op, .. } => Some(op.clone()),
                Statement::NotExecutable { .. } => None,
            })
            .collect()
    }

    pub fn executable_count(&self) -> usize {
        self.statements
            .iter()
            .filter(|s| matches!(s, Statement::Executable { .. }))
            .count()
    }

    pub fn rejected_count(&self) -> usize {
        self.statements.len() - self.executable_count()
    }
}

/// Extracts the inner content of every edit tag in `text`.
pub fn extract_tag_blocks(text: &str) -> Vec<&str> {
    TAG_BLOCK
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect()
}

/// Parses every edit-tag block in a full message. Multiple blocks contribute
/// statements in document order.
pub fn parse_edit_tag(text: &str) -> EditTagParse {
    let mut parse = EditTagParse::default();
    for block in extract_tag_blocks(text) {
        let block_parse = parse_statements(block);
        parse.statements.extend(block_parse.statements);
        parse.warnings.extend(block_parse.warnings);
    }
    parse
}

/// Parses one block's inner content into statements.
pub fn parse_statements(inner: &str) -> EditTagParse {
    let cleaned = inner.replace("<!--", "").replace("-->", "");
    let mut parse = EditTagParse::default();

    for piece in scan_statements(&cleaned) {
        match piece {
            ScannedPiece::Call { verb, args, raw } => {
                let statement = build_statement(&verb, &args, raw, &mut parse.warnings);
                parse.statements.push(statement);
            }
            ScannedPiece::Junk(raw) => {
                trace!(raw = raw.as_str(), "unparseable edit statement");
                parse.statements.push(Statement::NotExecutable {
                    raw,
                    reason: "not a recognized statement".to_string(),
                });
            }
        }
    }
    parse
}

enum ScannedPiece {
    Call {
        verb: String,
        args: String,
        raw: String,
    },
    Junk(String),
}

/// Splits block content into call-shaped pieces. A call is an identifier
/// followed by a balanced parenthesized argument list; the balance scan
/// honors quotes and escapes, so calls may span lines and contain nested
/// braces or quoted commas. Anything else is junk up to end of line.
fn scan_statements(text: &str) -> Vec<ScannedPiece> {
    let bytes = text.as_bytes();
    let mut pieces = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_whitespace() || c == ';' {
            i += 1;
            continue;
        }
        if c == '/' && bytes.get(i + 1) == Some(&b'/') {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            let verb_end = i;
            while i < bytes.len() && (bytes[i] as char).is_whitespace() {
                i += 1;
            }
            if bytes.get(i) == Some(&b'(') {
                match scan_balanced(text, i) {
                    Some(close) => {
                        let verb = text[start..verb_end].to_string();
                        let args = text[i + 1..close].to_string();
                        let raw = text[start..=close].to_string();
                        pieces.push(ScannedPiece::Call { verb, args, raw });
                        i = close + 1;
                        continue;
                    }
                    None => {
                        // Unterminated call: keep the rest as one junk piece.
                        pieces.push(ScannedPiece::Junk(text[start..].trim().to_string()));
                        break;
                    }
                }
            }
            // Identifier without a call: junk to end of line.
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            let junk = text[start..i].trim();
            if !junk.is_empty() {
                pieces.push(ScannedPiece::Junk(junk.to_string()));
            }
        } else {
            let start = i;
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            let junk = text[start..i].trim();
            if !junk.is_empty() {
                pieces.push(ScannedPiece::Junk(junk.to_string()));
            }
        }
    }
    pieces
}

/// Returns the index of the `)` matching the `(` at `open`, or `None` when
/// the call never closes. Quote- and escape-aware.
fn scan_balanced(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = open;

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
                b'(' | b'{' | b'[' => depth += 1,
                b')' | b'}' | b']' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 && b == b')' {
                        return Some(i);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

/// Splits an argument list on top-level commas. Commas inside quotes or any
/// nesting pair are preserved.
fn split_args(args: &str) -> Vec<String> {
    let bytes = args.as_bytes();
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut start = 0usize;
    let mut i = 0usize;

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
                b'(' | b'{' | b'[' => depth += 1,
                b')' | b'}' | b']' => depth = depth.saturating_sub(1),
                b',' if depth == 0 => {
                    out.push(args[start..i].trim().to_string());
                    start = i + 1;
                }
                _ => {}
            }
        }
        i += 1;
    }
    let tail = args[start..].trim();
    if !tail.is_empty() || !out.is_empty() {
        out.push(tail.to_string());
    }
    out.retain(|a| !a.is_empty());
    out
}

#[derive(Debug, PartialEq)]
enum ArgValue {
    Number(usize),
    Text(String),
    Object(BTreeMap<String, String>),
}

impl ArgValue {
    fn describe(&self) -> &'static str {
        match self {
            ArgValue::Number(_) => "number",
            ArgValue::Text(_) => "string",
            ArgValue::Object(_) => "object",
        }
    }
}

fn coerce_arg(token: &str) -> ArgValue {
    let trimmed = token.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return ArgValue::Object(parse_object_literal(trimmed));
    }
    let unquoted = unquote(trimmed);
    if !unquoted.is_empty() && unquoted.bytes().all(|b| b.is_ascii_digit()) {
        // Quoted digits still count as indices; models quote erratically.
        if let Ok(n) = unquoted.parse::<usize>() {
            return ArgValue::Number(n);
        }
    }
    ArgValue::Text(unquoted)
}

/// Parses `{key: value, ...}` into string pairs. Keys lose quoting; values
/// lose one layer of outer quoting and keep everything else verbatim.
fn parse_object_literal(token: &str) -> BTreeMap<String, String> {
    let inner = &token[1..token.len() - 1];
    let mut map = BTreeMap::new();
    for pair in split_args(inner) {
        let Some((key, value)) = split_key_value(&pair) else {
            continue;
        };
        map.insert(unquote(key.trim()), unquote(value.trim()));
    }
    map
}

/// Splits one `key: value` pair on the first top-level colon.
fn split_key_value(pair: &str) -> Option<(&str, &str)> {
    let bytes = pair.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = 0usize;
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
                b'(' | b'{' | b'[' => depth += 1,
                b')' | b'}' | b']' => depth = depth.saturating_sub(1),
                b':' if depth == 0 => return Some((&pair[..i], &pair[i + 1..])),
                _ => {}
            }
        }
        i += 1;
    }
    None
}

/// Strips one layer of matching outer quotes, undoing JSON escapes for
/// double-quoted tokens so canonical output re-parses exactly.
fn unquote(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        if let Ok(parsed) = serde_json::from_str::<String>(trimmed) {
            return parsed;
        }
        return trimmed[1..trimmed.len() - 1].to_string();
    }
    if trimmed.len() >= 2 && trimmed.starts_with('\'') && trimmed.ends_with('\'') {
        return trimmed[1..trimmed.len() - 1].replace("\\'", "'");
    }
    trimmed.to_string()
}

/// Folds verb synonyms and case variants into a canonical kind.
pub(crate) fn canonical_verb(raw: &str) -> Option<OpKind> {
    let folded: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    match folded.as_str() {
        "insertrow" | "insert" | "add" | "addrow" | "newrow" => Some(OpKind::InsertRow),
        "updaterow" | "update" | "edit" | "editrow" | "set" | "modify" => Some(OpKind::UpdateRow),
        "deleterow" | "delete" | "del" | "remove" | "removerow" => Some(OpKind::DeleteRow),
        _ => None,
    }
}

fn build_statement(verb: &str, args: &str, raw: String, warnings: &mut Vec<Warning>) -> Statement {
    let Some(kind) = canonical_verb(verb) else {
        return Statement::NotExecutable {
            raw,
            reason: format!("unknown verb '{verb}'"),
        };
    };
    if verb != kind.to_string() {
        warnings.push(Warning::new(
            "WARN_VERB_COERCED",
            format!("'{verb}' treated as {kind}"),
        ));
    }

    let values: Vec<ArgValue> = split_args(args).iter().map(|a| coerce_arg(a)).collect();
    match build_op(kind, &values) {
        Ok(op) => Statement::Executable { raw, op },
        Err(reason) => Statement::NotExecutable { raw, reason },
    }
}

fn build_op(kind: OpKind, values: &[ArgValue]) -> Result<TableOp, String> {
    let table = match values.first() {
        Some(ArgValue::Number(n)) => *n,
        Some(other) => {
            return Err(format!(
                "{kind} expects a numeric table index, got {}",
                other.describe()
            ));
        }
        None => return Err(format!("{kind} is missing its table index")),
    };

    match kind {
        OpKind::InsertRow => {
            let data = match values.get(1) {
                Some(ArgValue::Object(map)) => numeric_data(map)?,
                Some(other) => {
                    return Err(format!(
                        "insertRow expects a data object, got {}",
                        other.describe()
                    ));
                }
                None => return Err("insertRow is missing its data object".to_string()),
            };
            if values.len() > 2 {
                return Err(format!("insertRow takes 2 arguments, got {}", values.len()));
            }
            Ok(TableOp {
                kind,
                table,
                row: None,
                data: Some(data),
            })
        }
        OpKind::UpdateRow => {
            let row = match values.get(1) {
                Some(ArgValue::Number(n)) => *n,
                Some(other) => {
                    return Err(format!(
                        "updateRow expects a numeric row index, got {}",
                        other.describe()
                    ));
                }
                None => return Err("updateRow is missing its row index".to_string()),
            };
            let data = match values.get(2) {
                Some(ArgValue::Object(map)) => numeric_data(map)?,
                Some(other) => {
                    return Err(format!(
                        "updateRow expects a data object, got {}",
                        other.describe()
                    ));
                }
                None => return Err("updateRow is missing its data object".to_string()),
            };
            if values.len() > 3 {
                return Err(format!("updateRow takes 3 arguments, got {}", values.len()));
            }
            Ok(TableOp {
                kind,
                table,
                row: Some(row),
                data: Some(data),
            })
        }
        OpKind::DeleteRow => {
            let row = match values.get(1) {
                Some(ArgValue::Number(n)) => *n,
                Some(other) => {
                    return Err(format!(
                        "deleteRow expects a numeric row index, got {}",
                        other.describe()
                    ));
                }
                None => return Err("deleteRow is missing its row index".to_string()),
            };
            if values.len() > 2 {
                return Err(format!("deleteRow takes 2 arguments, got {}", values.len()));
            }
            Ok(TableOp {
                kind,
                table,
                row: Some(row),
                data: None,
            })
        }
    }
}

/// Converts parsed object keys to data-column indices. A non-numeric key
/// rejects the whole statement; silently guessing a column would corrupt
/// rows.
fn numeric_data(map: &BTreeMap<String, String>) -> Result<BTreeMap<usize, String>, String> {
    let mut out = BTreeMap::new();
    for (key, value) in map {
        let index: usize = key
            .trim()
            .parse()
            .map_err(|_| format!("data key '{key}' is not a column index"))?;
        out.insert(index, value.clone());
    }
    Ok(out)
}

/// Renders ops in canonical form: one statement per line, JSON-quoted data,
/// wrapped in a comment inside the tag.
pub fn canonical_block(ops: &[TableOp]) -> String {
    let mut lines = Vec::with_capacity(ops.len());
    for op in ops {
        lines.push(canonical_statement(op));
    }
    format!(
        "<{EDIT_TAG}>\n<!--\n{}\n-->\n</{EDIT_TAG}>",
        lines.join("\n")
    )
}

pub fn canonical_statement(op: &TableOp) -> String {
    let data = op.data.as_ref().map(|map| {
        // Keys render in numeric order; a string-keyed map would put "10"
        // before "2".
        let mut out = String::from("{");
        for (i, (key, value)) in map.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            let quoted =
                serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string());
            out.push_str(&format!("\"{key}\":{quoted}"));
        }
        out.push('}');
        out
    });
    match (op.kind, op.row, data) {
        (OpKind::InsertRow, _, Some(data)) => format!("insertRow({}, {data})", op.table),
        (OpKind::UpdateRow, Some(row), Some(data)) => {
            format!("updateRow({}, {row}, {data})", op.table)
        }
        (OpKind::DeleteRow, Some(row), _) => format!("deleteRow({}, {row})", op.table),
        // Shape holes only arise from hand-built ops; render them inert.
        (kind, row, data) => format!(
            "{kind}({}{}{})",
            op.table,
            row.map(|r| format!(", {r}")).unwrap_or_default(),
            data.map(|d| format!(", {d}")).unwrap_or_default()
        ),
    }
}

/// Replaces every edit tag in `text` with one canonical block (or removes
/// them all when `ops` is empty). Message text outside the tags is kept
/// verbatim.
pub fn rewrite_tag(text: &str, ops: &[TableOp]) -> String {
    let mut replaced_first = false;
    let result = TAG_BLOCK.replace_all(text, |_: &regex::Captures<'_>| {
        if !replaced_first && !ops.is_empty() {
            replaced_first = true;
            canonical_block(ops)
        } else {
            String::new()
        }
    });
    let mut out = result.into_owned();
    if !ops.is_empty() && !replaced_first {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&canonical_block(ops));
    }
    out
}
