use crate::ids::SessionId;
use crate::parse::repair::{Repaired, repair_response};
use crate::state::EngineState;
use crate::sync::incremental::commit_ops;
use anyhow::{Result, bail};
use serde_json::{Value, json};

/// Runs a raw payload through the repair pipeline and applies the resulting
/// operation list against the latest message.
pub fn apply(state: &EngineState, session: String, ops: String) -> Result<Value> {
    let (repaired, warnings) = repair_response(&ops, 0)?;
    let ops = match repaired {
        Repaired::Ops(ops) => ops,
        Repaired::Tables(_) => {
            bail!("payload is a table replacement, not an operation list; use sync")
        }
    };

    let mut session = state.load_session(&SessionId(session))?;
    let Some(piece) = session.transcript.last_index() else {
        bail!("session has no messages to attach operations to");
    };
    let commit = commit_ops(&mut session, state.templates(), piece, ops)?;
    state.save_session(&session)?;
    Ok(json!({
        "session": session.id.as_str(),
        "repair_warnings": warnings,
        "commit": commit,
    }))
}

/// Stateless repair of a model payload: reports what it decodes to without
/// touching any session.
pub fn repair(payload: String, expect: usize) -> Result<Value> {
    let (repaired, warnings) = repair_response(&payload, expect)?;
    let body = match repaired {
        Repaired::Tables(tables) => json!({ "kind": "tables", "tables": tables }),
        Repaired::Ops(ops) => json!({ "kind": "ops", "ops": ops }),
    };
    Ok(json!({
        "repaired": body,
        "warnings": warnings,
    }))
}
