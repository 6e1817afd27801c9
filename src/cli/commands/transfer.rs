use crate::ids::SessionId;
use crate::interchange::{TableDocument, export_document, import_document};
use crate::session::Session;
use crate::state::EngineState;
use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::fs;
use std::path::PathBuf;

pub fn export(state: &EngineState, session: String) -> Result<Value> {
    let session = state.load_session(&SessionId(session))?;
    let document = export_document(session.sheets.values(), &session.store);
    Ok(serde_json::to_value(document)?)
}

/// Builds a new session around an exported document. The transcript starts
/// empty; imported sheets become the registry state.
pub fn import(state: &EngineState, file: PathBuf) -> Result<Value> {
    let contents =
        fs::read_to_string(&file).with_context(|| format!("failed to read {:?}", file))?;
    let document: TableDocument = serde_json::from_str(&contents)
        .with_context(|| format!("{:?} is not an interchange document", file))?;

    let mut session = Session::new();
    let imported = import_document(document, &mut session.store)?;
    for sheet in imported.sheets {
        session.sheets.insert(sheet.id.clone(), sheet);
    }
    state.save_session(&session)?;

    let sheets: Vec<String> = session
        .sheets
        .values()
        .map(|sheet| sheet.name(&session.store))
        .collect();
    Ok(json!({
        "session": session.id.as_str(),
        "sheets": sheets,
        "warnings": imported.warnings,
    }))
}
