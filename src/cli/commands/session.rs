use crate::ids::SessionId;
use crate::state::EngineState;
use anyhow::Result;
use serde_json::{Value, json};

pub fn init(state: &EngineState) -> Result<Value> {
    let session = state.create_session()?;
    let sheets: Vec<String> = session
        .sheets
        .values()
        .map(|sheet| sheet.name(&session.store))
        .collect();
    Ok(json!({
        "session": session.id.as_str(),
        "created_at": session.created_at,
        "sheets": sheets,
    }))
}

pub fn list(state: &EngineState) -> Result<Value> {
    let sessions = state.repository().list()?;
    Ok(json!({ "sessions": sessions }))
}

pub fn delete(state: &EngineState, session: String) -> Result<Value> {
    let id = SessionId(session);
    state.delete_session(&id)?;
    Ok(json!({ "deleted": id.as_str() }))
}

pub fn sweep(state: &EngineState, session: String) -> Result<Value> {
    let id = SessionId(session);
    let mut session = state.load_session(&id)?;
    let removed = session.sweep();
    session.touch();
    state.save_session(&session)?;
    Ok(json!({
        "session": session.id.as_str(),
        "removed": removed,
        "store": session.stats().store,
    }))
}
