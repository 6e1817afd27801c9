use crate::client::{CompletionClient, HttpCompletionClient};
use crate::config::EngineConfig;
use crate::ids::SessionId;
use crate::prompt::{ProfileLibrary, PromptProfile};
use crate::session::{FileSessionRepository, Session, SessionRepository};
use crate::template::TemplateSet;
use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use lru::LruCache;
use parking_lot::RwLock;
use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Shared engine state: resolved config, the session repository, template
/// and profile libraries, and an LRU of hydrated sessions.
///
/// Sessions are cached as immutable snapshots. Mutation goes through
/// load (clone) / save, and `save_session` refreshes the cached copy, so a
/// cache hit always reflects the last persisted state.
pub struct EngineState {
    config: Arc<EngineConfig>,
    repository: Arc<dyn SessionRepository>,
    templates: Arc<TemplateSet>,
    profiles: Arc<ProfileLibrary>,
    sessions: RwLock<LruCache<SessionId, Arc<Session>>>,
}

impl EngineState {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.ensure_workspace_root()?;
        let repository: Arc<dyn SessionRepository> =
            Arc::new(FileSessionRepository::new(config.sessions_dir.clone())?);

        let templates = load_templates(&config)?;
        let profiles = load_profiles(&config)?;

        let capacity = NonZeroUsize::new(config.cache_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        info!(
            workspace = %config.workspace_root.display(),
            templates = templates.len(),
            cache_capacity = capacity.get(),
            "engine state initialized"
        );
        Ok(EngineState {
            config: Arc::new(config),
            repository,
            templates: Arc::new(templates),
            profiles: Arc::new(profiles),
            sessions: RwLock::new(LruCache::new(capacity)),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn repository(&self) -> &dyn SessionRepository {
        self.repository.as_ref()
    }

    pub fn templates(&self) -> &TemplateSet {
        &self.templates
    }

    pub fn profiles(&self) -> &ProfileLibrary {
        &self.profiles
    }

    /// Builds the completion client the sync pipelines talk to. Fails when
    /// no endpoint is configured; purely local commands never call this.
    pub fn completion_client(&self) -> Result<Arc<dyn CompletionClient>> {
        let Some(endpoint) = self.config.model_endpoint.as_deref() else {
            bail!(
                "no model endpoint configured; set --model-endpoint or \
                 MEMSHEET_MODEL_ENDPOINT"
            );
        };
        let client = HttpCompletionClient::new(
            endpoint,
            self.config.model_name.clone(),
            self.config.api_key.clone(),
            self.config.request_timeout_ms,
        )
        .map_err(|e| anyhow::anyhow!("failed to build completion client: {e}"))?;
        Ok(Arc::new(client))
    }

    /// Creates, persists, and caches a fresh session seeded from the
    /// template library.
    pub fn create_session(&self) -> Result<Session> {
        let session = Session::bootstrap(&self.templates);
        self.repository.save(&session)?;
        self.sessions
            .write()
            .put(session.id.clone(), Arc::new(session.clone()));
        info!(session = session.id.as_str(), "session created");
        Ok(session)
    }

    /// Returns an owned copy of the session, from cache when possible.
    pub fn load_session(&self, id: &SessionId) -> Result<Session> {
        if let Some(cached) = self.sessions.write().get(id) {
            debug!(session = id.as_str(), "session cache hit");
            return Ok((**cached).clone());
        }
        let session = self.repository.load(id)?;
        self.sessions
            .write()
            .put(id.clone(), Arc::new(session.clone()));
        Ok(session)
    }

    /// Persists the session and refreshes its cached snapshot.
    pub fn save_session(&self, session: &Session) -> Result<()> {
        self.repository.save(session)?;
        self.sessions
            .write()
            .put(session.id.clone(), Arc::new(session.clone()));
        Ok(())
    }

    pub fn delete_session(&self, id: &SessionId) -> Result<()> {
        self.repository.delete(id)?;
        self.sessions.write().pop(id);
        Ok(())
    }
}

fn load_templates(config: &EngineConfig) -> Result<TemplateSet> {
    let Some(path) = config.templates_file.as_ref() else {
        return Ok(TemplateSet::builtin());
    };
    let set: TemplateSet = read_data_file(path)?;
    anyhow::ensure!(
        !set.is_empty(),
        "template file {:?} defines no templates",
        path
    );
    debug!(path = %path.display(), templates = set.len(), "loaded template file");
    Ok(set)
}

fn load_profiles(config: &EngineConfig) -> Result<ProfileLibrary> {
    let mut library = ProfileLibrary::builtin();
    if let Some(path) = config.profiles_file.as_ref() {
        let overrides: IndexMap<String, PromptProfile> = read_data_file(path)?;
        debug!(path = %path.display(), profiles = overrides.len(), "merged profile overrides");
        library.merge(overrides);
    }
    Ok(library)
}

fn read_data_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("failed to read {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML file {:?}", path))?,
        _ => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON file {:?}", path))?,
    };
    Ok(parsed)
}
