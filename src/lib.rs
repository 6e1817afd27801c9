//! Versioned memory tables for LLM chat sessions.
//!
//! A session owns a set of small tables (sheets) whose cells live in a
//! hash-addressed store with append-only value history. Every committed
//! message snapshots the grid layout of each sheet, so table state can be
//! resolved at any point of the transcript and follows swipes and edits
//! when the conversation branches. Model-driven sync keeps the tables in
//! step with the conversation, either incrementally through edit tags or
//! wholesale through a validated rebuild.

pub mod action;
pub mod cell;
pub mod cli;
pub mod client;
pub mod config;
pub mod diff;
pub mod errors;
pub mod history;
pub mod ids;
pub mod interchange;
pub mod parse;
pub mod prompt;
pub mod session;
pub mod sheet;
pub mod state;
pub mod store;
pub mod sync;
pub mod template;

pub use config::{CliArgs, EngineConfig};
pub use errors::{MutationError, RepairError, SyncError, Warning};
pub use session::{Session, SessionRepository};
pub use state::EngineState;
