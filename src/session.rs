use crate::history::Transcript;
use crate::ids::{CellId, SessionId, SheetId};
use crate::sheet::Sheet;
use crate::store::{CellStore, StoreStats};
use crate::template::TemplateSet;
use ahash::AHashSet;
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One conversation's complete memory state: the shared cell store, the
/// sheet registry (current state of every table), and the transcript whose
/// snapshots version that state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sheets: IndexMap<SheetId, Sheet>,
    pub store: CellStore,
    #[serde(default)]
    pub transcript: Transcript,
}

impl Session {
    pub fn new() -> Self {
        let now = Utc::now();
        Session {
            id: SessionId::generate(),
            created_at: now,
            updated_at: now,
            sheets: IndexMap::new(),
            store: CellStore::new(),
            transcript: Transcript::default(),
        }
    }

    /// New session seeded with one instance of every template.
    pub fn bootstrap(templates: &TemplateSet) -> Self {
        let mut session = Session::new();
        for sheet in templates.instantiate_all(&mut session.store) {
            session.sheets.insert(sheet.id.clone(), sheet);
        }
        session
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn sheet(&self, id: &SheetId) -> Option<&Sheet> {
        self.sheets.get(id)
    }

    /// Registry sheets by value, in registry order. Prompt rendering and
    /// sync passes work on these copies; the registry is only written back
    /// through commits.
    pub fn current_sheets(&self) -> Vec<Sheet> {
        self.sheets.values().cloned().collect()
    }

    /// Sheet matching a display name, case-insensitively.
    pub fn sheet_by_name(&self, name: &str) -> Option<&Sheet> {
        self.sheets
            .values()
            .find(|s| s.name(&self.store).eq_ignore_ascii_case(name))
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            sheets: self.sheets.len(),
            pieces: self.transcript.len(),
            snapshots: self
                .transcript
                .pieces
                .iter()
                .flat_map(|p| p.swipes.iter())
                .filter(|s| s.snapshot.is_some())
                .count(),
            store: self.store.stats(),
        }
    }

    /// Every cell id still reachable from the registry or any snapshot on
    /// any swipe. Alternate swipes count: switching back must keep working.
    pub fn referenced_cells(&self) -> AHashSet<CellId> {
        let mut referenced = AHashSet::new();
        for sheet in self.sheets.values() {
            for id in sheet.grid.iter().flatten() {
                referenced.insert(id.clone());
            }
        }
        for piece in &self.transcript.pieces {
            for swipe in &piece.swipes {
                if let Some(snapshot) = &swipe.snapshot {
                    for id in snapshot.cell_ids() {
                        referenced.insert(id.clone());
                    }
                }
            }
        }
        referenced
    }

    /// Drops evicted cells nothing references anymore. Returns how many
    /// were dropped.
    pub fn sweep(&mut self) -> usize {
        let referenced = self.referenced_cells();
        let dropped = self.store.sweep(&referenced);
        if dropped > 0 {
            debug!(session = %self.id, dropped, "swept unreferenced cells");
        }
        dropped
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub sheets: usize,
    pub pieces: usize,
    pub snapshots: usize,
    pub store: StoreStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionDescriptor {
    pub id: SessionId,
    pub updated_at: DateTime<Utc>,
    pub sheets: usize,
    pub pieces: usize,
}

pub trait SessionRepository: Send + Sync {
    fn list(&self) -> Result<Vec<SessionDescriptor>>;
    fn load(&self, id: &SessionId) -> Result<Session>;
    fn save(&self, session: &Session) -> Result<()>;
    fn delete(&self, id: &SessionId) -> Result<()>;
    fn exists(&self, id: &SessionId) -> bool;
}

/// One JSON file per session under a root directory. Saves go through a
/// temp file and an atomic rename, so a crash mid-write never corrupts the
/// previous state.
pub struct FileSessionRepository {
    root: PathBuf,
}

impl FileSessionRepository {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("creating session root {}", root.display()))?;
        Ok(FileSessionRepository { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &SessionId) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }
}

impl SessionRepository for FileSessionRepository {
    fn list(&self) -> Result<Vec<SessionDescriptor>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path)?;
            let session: Session = match serde_json::from_slice(&bytes) {
                Ok(session) => session,
                Err(err) => {
                    debug!(path = %path.display(), %err, "skipping unreadable session file");
                    continue;
                }
            };
            out.push(SessionDescriptor {
                id: session.id,
                updated_at: session.updated_at,
                sheets: session.sheets.len(),
                pieces: session.transcript.len(),
            });
        }
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }

    fn load(&self, id: &SessionId) -> Result<Session> {
        let path = self.path_for(id);
        let bytes =
            fs::read(&path).map_err(|_| anyhow!("session {id} not found in {}", self.root.display()))?;
        let session: Session = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing session file {}", path.display()))?;
        Ok(session)
    }

    fn save(&self, session: &Session) -> Result<()> {
        let path = self.path_for(&session.id);
        let json = serde_json::to_vec_pretty(session)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        tmp.write_all(&json)?;
        tmp.persist(&path)
            .with_context(|| format!("replacing session file {}", path.display()))?;
        Ok(())
    }

    fn delete(&self, id: &SessionId) -> Result<()> {
        let path = self.path_for(id);
        fs::remove_file(&path).with_context(|| format!("deleting {}", path.display()))
    }

    fn exists(&self, id: &SessionId) -> bool {
        self.path_for(id).exists()
    }
}
