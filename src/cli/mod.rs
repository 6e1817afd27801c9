pub mod commands;
pub mod errors;
pub mod output;

use crate::config::{CliArgs, EngineConfig};
use crate::state::EngineState;
use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
}

#[derive(Debug, Parser)]
#[command(
    name = "memsheet-cli",
    version,
    about = "Versioned memory tables for LLM chat sessions"
)]
pub struct Cli {
    #[arg(long, value_enum, default_value_t = OutputFormat::Json, global = true)]
    pub format: OutputFormat,

    #[arg(long, global = true)]
    pub compact: bool,

    #[arg(long, global = true)]
    pub quiet: bool,

    #[command(flatten)]
    pub engine: CliArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create a new session seeded from the template library.
    Init,
    /// List sessions, most recently updated first.
    List,
    /// Current tables of a session.
    Show {
        session: String,
        /// Include a markdown rendering of every table.
        #[arg(long)]
        rendered: bool,
    },
    /// Transcript overview, or one message in detail.
    History {
        session: String,
        #[arg(long)]
        piece: Option<usize>,
    },
    /// Store and per-sheet statistics.
    Stats {
        session: String,
    },
    Delete {
        session: String,
    },
    /// Drop evicted cells no longer referenced by any snapshot.
    Sweep {
        session: String,
    },
    /// Append a message, committing any edit tag it carries.
    Message {
        session: String,
        text: String,
        /// user or assistant
        #[arg(long, default_value = "user")]
        role: String,
        /// Report what the edits would do without touching the session.
        #[arg(long)]
        dry_run: bool,
    },
    /// Switch a message to another swipe, moving table state with it.
    Swipe {
        session: String,
        piece: usize,
        swipe: usize,
    },
    /// Record a regenerated message body and commit its edits.
    Regenerate {
        session: String,
        piece: usize,
        text: String,
    },
    /// Apply a JSON operation list against the latest message.
    Apply {
        session: String,
        ops: String,
    },
    /// Repair a raw model payload without touching any session.
    Repair {
        payload: String,
        /// Minimum table count for full replacements; 0 skips the check.
        #[arg(long, default_value_t = 0)]
        expect: usize,
    },
    /// Export a session as an interchange document.
    Export {
        session: String,
    },
    /// Import an interchange document as a new session.
    Import {
        file: PathBuf,
    },
    /// Run a model-driven rebuild of the session's tables.
    Sync {
        session: String,
        #[arg(long)]
        profile: Option<String>,
        /// Commit the result instead of returning a proposal.
        #[arg(long)]
        commit: bool,
    },
    /// List available prompt profiles.
    Profiles,
    /// JSON schema of the config file.
    Schema,
}

pub async fn run_command(args: CliArgs, command: Commands) -> Result<Value> {
    // Repair and schema are pure functions of their input; they must not
    // require a workspace.
    match command {
        Commands::Repair { payload, expect } => return commands::apply::repair(payload, expect),
        Commands::Schema => return Ok(serde_json::to_value(crate::config::config_schema())?),
        _ => {}
    }

    let config = EngineConfig::from_args(args)?;
    let state = EngineState::new(config)?;
    match command {
        Commands::Init => commands::session::init(&state),
        Commands::List => commands::session::list(&state),
        Commands::Show { session, rendered } => commands::show::show(&state, session, rendered),
        Commands::History { session, piece } => commands::show::history(&state, session, piece),
        Commands::Stats { session } => commands::show::stats(&state, session),
        Commands::Delete { session } => commands::session::delete(&state, session),
        Commands::Sweep { session } => commands::session::sweep(&state, session),
        Commands::Message {
            session,
            text,
            role,
            dry_run,
        } => commands::message::message(&state, session, text, role, dry_run),
        Commands::Swipe {
            session,
            piece,
            swipe,
        } => commands::message::swipe(&state, session, piece, swipe),
        Commands::Regenerate {
            session,
            piece,
            text,
        } => commands::message::regenerate(&state, session, piece, text),
        Commands::Apply { session, ops } => commands::apply::apply(&state, session, ops),
        Commands::Export { session } => commands::transfer::export(&state, session),
        Commands::Import { file } => commands::transfer::import(&state, file),
        Commands::Sync {
            session,
            profile,
            commit,
        } => commands::sync::sync(&state, session, profile, commit).await,
        Commands::Profiles => commands::sync::profiles(&state),
        Commands::Repair { .. } | Commands::Schema => unreachable!("handled above"),
    }
}
