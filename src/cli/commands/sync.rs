use crate::client::CancelToken;
use crate::ids::SessionId;
use crate::state::EngineState;
use crate::sync::incremental::commit_ops;
use crate::sync::rebuild::{RebuildOutcome, run_rebuild};
use anyhow::{Result, bail};
use serde_json::{Value, json};

pub async fn sync(
    state: &EngineState,
    session: String,
    profile: Option<String>,
    commit: bool,
) -> Result<Value> {
    let mut session = state.load_session(&SessionId(session))?;
    let client = state.completion_client()?;

    let mut options = state.config().rebuild_options();
    if let Some(profile) = profile {
        options.profile = profile;
    }
    options.silent = options.silent || commit;

    let cancel = CancelToken::new();
    let outcome = run_rebuild(
        &mut session,
        state.profiles(),
        client.as_ref(),
        &cancel,
        &options,
    )
    .await?;

    match outcome {
        RebuildOutcome::Committed(report) => {
            state.save_session(&session)?;
            Ok(json!({
                "session": session.id.as_str(),
                "mode": "committed",
                "report": report,
            }))
        }
        RebuildOutcome::Proposed(proposal) => Ok(json!({
            "session": session.id.as_str(),
            "mode": "proposed",
            "revisions": proposal.revisions,
            "warnings": proposal.warnings,
        })),
        RebuildOutcome::Ops(ops) => {
            let Some(piece) = session.transcript.last_index() else {
                bail!("model returned operations but the session has no messages");
            };
            let commit = commit_ops(&mut session, state.templates(), piece, ops)?;
            state.save_session(&session)?;
            Ok(json!({
                "session": session.id.as_str(),
                "mode": "ops",
                "commit": commit,
            }))
        }
    }
}

pub fn profiles(state: &EngineState) -> Result<Value> {
    Ok(json!({ "profiles": state.profiles().names() }))
}
