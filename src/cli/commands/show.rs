use crate::ids::SessionId;
use crate::prompt::render_tables_text;
use crate::state::EngineState;
use anyhow::Result;
use serde_json::{Value, json};

pub fn show(state: &EngineState, session: String, rendered: bool) -> Result<Value> {
    let session = state.load_session(&SessionId(session))?;
    let sheets: Vec<Value> = session
        .sheets
        .values()
        .map(|sheet| {
            json!({
                "id": sheet.id,
                "name": sheet.name(&session.store),
                "kind": sheet.kind,
                "columns": sheet.column_titles(&session.store),
                "rows": sheet.data_rows(),
                "prompt": sheet.prompt(&session.store),
            })
        })
        .collect();

    let mut payload = json!({
        "session": session.id.as_str(),
        "updated_at": session.updated_at,
        "sheets": sheets,
    });
    if rendered {
        let current = session.current_sheets();
        payload["rendered"] = Value::String(render_tables_text(&current, &session.store));
    }
    Ok(payload)
}

pub fn history(state: &EngineState, session: String, piece: Option<usize>) -> Result<Value> {
    let session = state.load_session(&SessionId(session))?;

    if let Some(index) = piece {
        let piece = session
            .transcript
            .get(index)
            .ok_or_else(|| anyhow::anyhow!("no message at index {index}"))?;
        return Ok(json!({
            "session": session.id.as_str(),
            "piece": index,
            "detail": piece,
        }));
    }

    let pieces: Vec<Value> = session
        .transcript
        .iter()
        .enumerate()
        .map(|(index, piece)| {
            let text = piece.text();
            let excerpt: String = text.chars().take(80).collect();
            json!({
                "index": index,
                "role": piece.role,
                "swipes": piece.swipes.len(),
                "selected": piece.selected,
                "regenerated": piece.regenerated,
                "snapshot": piece.snapshot().is_some(),
                "excerpt": excerpt,
            })
        })
        .collect();
    Ok(json!({
        "session": session.id.as_str(),
        "pieces": pieces,
    }))
}

pub fn stats(state: &EngineState, session: String) -> Result<Value> {
    let session = state.load_session(&SessionId(session))?;
    let per_sheet: Vec<Value> = session
        .sheets
        .values()
        .map(|sheet| {
            json!({
                "name": sheet.name(&session.store),
                "rows": sheet.data_rows(),
                "cols": sheet.data_cols(),
            })
        })
        .collect();
    Ok(json!({
        "session": session.id.as_str(),
        "stats": session.stats(),
        "sheets": per_sheet,
    }))
}
