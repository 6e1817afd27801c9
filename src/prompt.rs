use crate::history::{PieceRole, Transcript};
use crate::parse::rewrite_tag;
use crate::sheet::Sheet;
use crate::store::CellStore;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// One reusable prompt pair. `system` and `user` may contain the
/// placeholders `{{tables}}`, `{{context}}`, and `{{schema}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptProfile {
    pub system: String,
    pub user: String,
}

/// Named prompt profiles: the built-in set plus any user overrides merged
/// on top.
#[derive(Debug, Default)]
pub struct ProfileLibrary {
    profiles: IndexMap<String, PromptProfile>,
}

pub const PROFILE_REBUILD: &str = "rebuild";
pub const PROFILE_FIX: &str = "fix";
pub const PROFILE_OPS: &str = "ops";

impl ProfileLibrary {
    pub fn builtin() -> Self {
        let mut library = ProfileLibrary::default();
        library.profiles.insert(
            PROFILE_REBUILD.to_string(),
            PromptProfile {
                system: "You maintain structured memory tables for an ongoing conversation. \
                         Reorganize the tables so they are accurate, deduplicated, and concise. \
                         Never change table names or column headers. Respond with a JSON array \
                         of objects shaped {\"tableName\": string, \"columns\": [string], \
                         \"content\": [[string]]} and nothing else."
                    .to_string(),
                user: "Current tables:\n{{tables}}\n\nRecent conversation:\n{{context}}\n\n\
                       Return every table, in the same order, with updated content rows."
                    .to_string(),
            },
        );
        library.profiles.insert(
            PROFILE_FIX.to_string(),
            PromptProfile {
                system: "You repair damaged memory tables. Fix misplaced values, merge duplicate \
                         rows, and drop rows that describe the same fact twice. Keep table names \
                         and column headers exactly as given. Respond with a JSON array of \
                         {\"tableName\", \"columns\", \"content\"} objects and nothing else."
                    .to_string(),
                user: "Expected schema:\n{{schema}}\n\nCurrent tables:\n{{tables}}\n\n\
                       Return the corrected tables as JSON."
                    .to_string(),
            },
        );
        library.profiles.insert(
            PROFILE_OPS.to_string(),
            PromptProfile {
                system: "You maintain structured memory tables for an ongoing conversation. \
                         Propose the smallest set of edits that brings the tables up to date. \
                         Respond with a JSON array of operations shaped {\"action\": \
                         \"insertRow\"|\"updateRow\"|\"deleteRow\", \"tableIndex\": number, \
                         \"rowIndex\": number?, \"data\": {columnIndex: string}?} and nothing \
                         else."
                    .to_string(),
                user: "Current tables:\n{{tables}}\n\nRecent conversation:\n{{context}}\n\n\
                       Return the operations as JSON."
                    .to_string(),
            },
        );
        library
    }

    pub fn get(&self, name: &str) -> Option<&PromptProfile> {
        self.profiles.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.profiles.keys().map(String::as_str).collect()
    }

    /// Adds or replaces profiles by name.
    pub fn merge(&mut self, overrides: IndexMap<String, PromptProfile>) {
        for (name, profile) in overrides {
            self.profiles.insert(name, profile);
        }
    }
}

/// Inputs substituted into a profile's placeholders.
#[derive(Debug, Default)]
pub struct PromptInputs {
    pub tables: String,
    pub context: String,
    pub schema: String,
}

#[derive(Debug, Clone)]
pub struct PromptRequest {
    pub system: String,
    pub user: String,
}

pub fn fill_profile(profile: &PromptProfile, inputs: &PromptInputs) -> PromptRequest {
    let substitute = |template: &str| {
        template
            .replace("{{tables}}", &inputs.tables)
            .replace("{{context}}", &inputs.context)
            .replace("{{schema}}", &inputs.schema)
    };
    PromptRequest {
        system: substitute(&profile.system),
        user: substitute(&profile.user),
    }
}

/// Compact text rendering of sheets for the model. Table indices match the
/// wire protocol's `tableIndex`; row indices are data rows (0-based,
/// header row excluded), matching `rowIndex`.
pub fn render_tables_text(sheets: &[Sheet], store: &CellStore) -> String {
    let mut out = String::new();
    for (index, sheet) in sheets.iter().enumerate() {
        if !sheet.config.include_in_prompt {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        let _ = writeln!(out, "[{index}] {}", sheet.name(store));
        if let Some(prompt) = sheet.prompt(store) {
            let _ = writeln!(out, "note: {prompt}");
        }
        let _ = writeln!(out, "columns: {}", sheet.column_titles(store).join(" | "));
        for row in 1..sheet.rows() {
            let _ = writeln!(
                out,
                "{}: {}",
                row - 1,
                sheet.row_values(store, row).join(" | ")
            );
        }
    }
    out
}

/// Schema-only rendering: names, columns, and column prompts, no content.
pub fn render_schema_text(sheets: &[Sheet], store: &CellStore) -> String {
    let mut out = String::new();
    for (index, sheet) in sheets.iter().enumerate() {
        if !out.is_empty() {
            out.push('\n');
        }
        let _ = writeln!(out, "[{index}] {}", sheet.name(store));
        for (col, (title, description)) in sheet.column_schema(store).iter().enumerate() {
            match description {
                Some(desc) => {
                    let _ = writeln!(out, "  {col}: {title} ({desc})");
                }
                None => {
                    let _ = writeln!(out, "  {col}: {title}");
                }
            }
        }
    }
    out
}

/// Rough token count: four ASCII characters per token, one token per
/// non-ASCII character. Close enough to budget context windows.
pub fn estimate_tokens(text: &str) -> usize {
    let mut ascii = 0usize;
    let mut wide = 0usize;
    for c in text.chars() {
        if c.is_ascii() {
            ascii += 1;
        } else {
            wide += 1;
        }
    }
    ascii.div_ceil(4) + wide
}

static FENCE_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*```.*$").expect("fence regex"));
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^<>\n]+>").expect("tag regex"));
static BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("blank regex"));

/// Strips inline formatting before text is fed to token estimation or the
/// repair pipeline: edit-tag blocks, code fences, HTML tags, and markdown
/// emphasis markers go; plain text stays.
pub fn strip_formatting(text: &str) -> String {
    let without_tags = rewrite_tag(text, &[]);
    let without_fences = FENCE_LINE.replace_all(&without_tags, "");
    let without_html = HTML_TAG.replace_all(&without_fences, "");
    let plain = without_html
        .replace("**", "")
        .replace("__", "")
        .replace("~~", "")
        .replace('`', "");
    BLANK_RUN.replace_all(&plain, "\n\n").trim().to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextWindow {
    pub text: String,
    pub included: usize,
    pub estimated_tokens: usize,
    pub truncated: bool,
}

/// Collects recent conversation text, newest message last. Bounded by a
/// message count and/or an estimated token budget; the newest message is
/// always included whole even when it alone exceeds the budget, so the
/// window is never empty while any message exists.
pub fn assemble_context(
    transcript: &Transcript,
    before_index: usize,
    max_messages: Option<usize>,
    max_tokens: Option<usize>,
) -> ContextWindow {
    let end = before_index.min(transcript.len());
    let mut selected: Vec<String> = Vec::new();
    let mut tokens = 0usize;
    let mut truncated = false;

    for index in (0..end).rev() {
        let Some(piece) = transcript.get(index) else {
            continue;
        };
        let body = strip_formatting(piece.text());
        if body.is_empty() {
            continue;
        }
        let label = match piece.role {
            PieceRole::User => "User",
            PieceRole::Assistant => "Assistant",
        };
        let line = format!("{label}: {body}");
        let cost = estimate_tokens(&line);

        if let Some(limit) = max_messages
            && selected.len() >= limit
        {
            truncated = true;
            break;
        }
        if let Some(budget) = max_tokens
            && !selected.is_empty()
            && tokens + cost > budget
        {
            truncated = true;
            break;
        }

        tokens += cost;
        selected.push(line);
    }

    selected.reverse();
    ContextWindow {
        text: selected.join("\n\n"),
        included: selected.len(),
        estimated_tokens: tokens,
        truncated,
    }
}
