use crate::history::{Piece, PieceRole};
use crate::ids::SessionId;
use crate::state::EngineState;
use crate::sync::incremental::{commit_piece_edits, record_regenerated, switch_swipe};
use anyhow::{Context, Result};
use serde_json::{Value, json};

/// Appends a message and commits any edit tag it carries. With `dry_run`
/// the whole thing happens on a throwaway copy and the session is left as
/// it was.
pub fn message(
    state: &EngineState,
    session: String,
    text: String,
    role: String,
    dry_run: bool,
) -> Result<Value> {
    let role: PieceRole = role
        .parse()
        .with_context(|| format!("invalid role '{role}'; expected user or assistant"))?;
    let mut session = state.load_session(&SessionId(session))?;

    let piece = match role {
        PieceRole::User => Piece::user(text),
        PieceRole::Assistant => Piece::assistant(text),
    };

    if dry_run {
        let mut scratch = session.clone();
        let index = scratch.transcript.push(piece);
        let commit = commit_piece_edits(&mut scratch, state.templates(), index)?;
        return Ok(json!({
            "session": session.id.as_str(),
            "dry_run": true,
            "commit": commit,
        }));
    }

    let index = session.transcript.push(piece);
    let commit = commit_piece_edits(&mut session, state.templates(), index)?;
    state.save_session(&session)?;
    Ok(json!({
        "session": session.id.as_str(),
        "commit": commit,
    }))
}

pub fn swipe(state: &EngineState, session: String, piece: usize, swipe: usize) -> Result<Value> {
    let mut session = state.load_session(&SessionId(session))?;
    let commit = switch_swipe(&mut session, state.templates(), piece, swipe)?;
    state.save_session(&session)?;
    Ok(json!({
        "session": session.id.as_str(),
        "piece": piece,
        "swipe": swipe,
        "commit": commit,
    }))
}

pub fn regenerate(state: &EngineState, session: String, piece: usize, text: String) -> Result<Value> {
    let mut session = state.load_session(&SessionId(session))?;
    let commit = record_regenerated(&mut session, state.templates(), piece, text)?;
    state.save_session(&session)?;
    Ok(json!({
        "session": session.id.as_str(),
        "commit": commit,
    }))
}
