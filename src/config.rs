use anyhow::{Context, Result};
use clap::Parser;
use schemars::JsonSchema;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CACHE_CAPACITY: usize = 8;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_SYNC_EVERY_N: u32 = 3;
const DEFAULT_MAX_CONTEXT_MESSAGES: u64 = 24;
const DEFAULT_MAX_CONTEXT_TOKENS: u64 = 6_000;
const DEFAULT_MODEL_NAME: &str = "local";
const TEMPLATES_FILE: &str = "templates.json";
const PROFILES_FILE: &str = "profiles.yaml";

/// Resolved engine configuration: CLI arguments take precedence over the
/// config file, which takes precedence over defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub workspace_root: PathBuf,
    /// Where session files live. Relative paths resolve under the
    /// workspace root.
    pub sessions_dir: PathBuf,
    /// Template overrides; the builtin set applies when absent.
    pub templates_file: Option<PathBuf>,
    /// Prompt profile overrides; builtin profiles apply when absent.
    pub profiles_file: Option<PathBuf>,
    /// Hydrated sessions kept in memory.
    pub cache_capacity: usize,
    /// Base URL of an OpenAI-compatible completion endpoint. Sync commands
    /// that need a model fail without one.
    pub model_endpoint: Option<String>,
    pub model_name: String,
    pub api_key: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub temperature: Option<f32>,
    /// Assistant messages between automatic sync passes. Zero disables
    /// automatic syncing entirely.
    pub sync_every_n: u32,
    pub max_context_messages: Option<usize>,
    pub max_context_tokens: Option<usize>,
    /// Commit rebuild results without producing a reviewable proposal.
    pub silent_rebuild: bool,
}

impl EngineConfig {
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let CliArgs {
            config,
            workspace_root: cli_workspace_root,
            sessions_dir: cli_sessions_dir,
            templates_file: cli_templates_file,
            profiles_file: cli_profiles_file,
            cache_capacity: cli_cache_capacity,
            model_endpoint: cli_model_endpoint,
            model_name: cli_model_name,
            api_key: cli_api_key,
            request_timeout_ms: cli_request_timeout_ms,
            temperature: cli_temperature,
            sync_every_n: cli_sync_every_n,
            max_context_messages: cli_max_context_messages,
            max_context_tokens: cli_max_context_tokens,
            silent_rebuild: cli_silent_rebuild,
        } = args;

        let file_config = if let Some(path) = config.as_ref() {
            load_config_file(path)?
        } else {
            PartialConfig::default()
        };

        let PartialConfig {
            workspace_root: file_workspace_root,
            sessions_dir: file_sessions_dir,
            templates_file: file_templates_file,
            profiles_file: file_profiles_file,
            cache_capacity: file_cache_capacity,
            model_endpoint: file_model_endpoint,
            model_name: file_model_name,
            api_key: file_api_key,
            request_timeout_ms: file_request_timeout_ms,
            temperature: file_temperature,
            sync_every_n: file_sync_every_n,
            max_context_messages: file_max_context_messages,
            max_context_tokens: file_max_context_tokens,
            silent_rebuild: file_silent_rebuild,
        } = file_config;

        let workspace_root = cli_workspace_root
            .or(file_workspace_root)
            .unwrap_or_else(|| PathBuf::from("."));

        let resolve = |path: PathBuf| {
            if path.is_absolute() {
                path
            } else {
                workspace_root.join(path)
            }
        };

        let sessions_dir = cli_sessions_dir
            .or(file_sessions_dir)
            .map(&resolve)
            .unwrap_or_else(|| workspace_root.join("sessions"));

        // Workspace-local template/profile files apply implicitly when they
        // exist; explicit settings are honored verbatim.
        let templates_file = cli_templates_file
            .or(file_templates_file)
            .map(&resolve)
            .or_else(|| {
                let implied = workspace_root.join(TEMPLATES_FILE);
                implied.exists().then_some(implied)
            });
        let profiles_file = cli_profiles_file
            .or(file_profiles_file)
            .map(&resolve)
            .or_else(|| {
                let implied = workspace_root.join(PROFILES_FILE);
                implied.exists().then_some(implied)
            });

        let cache_capacity = cli_cache_capacity
            .or(file_cache_capacity)
            .unwrap_or(DEFAULT_CACHE_CAPACITY)
            .max(1);

        let model_endpoint = cli_model_endpoint
            .or(file_model_endpoint)
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());
        let model_name = cli_model_name
            .or(file_model_name)
            .unwrap_or_else(|| DEFAULT_MODEL_NAME.to_string());
        let api_key = cli_api_key.or(file_api_key).filter(|key| !key.is_empty());

        let request_timeout_ms = cli_request_timeout_ms
            .or(file_request_timeout_ms)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);
        let request_timeout_ms = if request_timeout_ms == 0 {
            None
        } else {
            Some(request_timeout_ms)
        };

        let temperature = cli_temperature.or(file_temperature);

        let sync_every_n = cli_sync_every_n
            .or(file_sync_every_n)
            .unwrap_or(DEFAULT_SYNC_EVERY_N);

        let max_context_messages = cli_max_context_messages
            .or(file_max_context_messages)
            .unwrap_or(DEFAULT_MAX_CONTEXT_MESSAGES);
        let max_context_messages = if max_context_messages == 0 {
            None
        } else {
            Some(max_context_messages as usize)
        };

        let max_context_tokens = cli_max_context_tokens
            .or(file_max_context_tokens)
            .unwrap_or(DEFAULT_MAX_CONTEXT_TOKENS);
        let max_context_tokens = if max_context_tokens == 0 {
            None
        } else {
            Some(max_context_tokens as usize)
        };

        let silent_rebuild = cli_silent_rebuild || file_silent_rebuild.unwrap_or(false);

        Ok(Self {
            workspace_root,
            sessions_dir,
            templates_file,
            profiles_file,
            cache_capacity,
            model_endpoint,
            model_name,
            api_key,
            request_timeout_ms,
            temperature,
            sync_every_n,
            max_context_messages,
            max_context_tokens,
            silent_rebuild,
        })
    }

    pub fn ensure_workspace_root(&self) -> Result<()> {
        anyhow::ensure!(
            self.workspace_root.exists(),
            "workspace root {:?} does not exist",
            self.workspace_root
        );
        anyhow::ensure!(
            self.workspace_root.is_dir(),
            "workspace root {:?} is not a directory",
            self.workspace_root
        );
        Ok(())
    }

    pub fn resolve_path<P: AsRef<Path>>(&self, relative: P) -> PathBuf {
        let relative = relative.as_ref();
        if relative.is_absolute() {
            relative.to_path_buf()
        } else {
            self.workspace_root.join(relative)
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn rebuild_options(&self) -> crate::sync::RebuildOptions {
        crate::sync::RebuildOptions {
            silent: self.silent_rebuild,
            temperature: self.temperature,
            max_context_messages: self.max_context_messages,
            max_context_tokens: self.max_context_tokens,
            ..crate::sync::RebuildOptions::default()
        }
    }
}

/// JSON schema of the config file, for `memsheet-cli schema`.
pub fn config_schema() -> schemars::Schema {
    schemars::schema_for!(PartialConfig)
}

#[derive(Parser, Debug, Default, Clone)]
pub struct CliArgs {
    #[arg(
        long,
        value_name = "FILE",
        help = "Path to a configuration file (YAML or JSON)",
        global = true
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "MEMSHEET_WORKSPACE",
        value_name = "DIR",
        help = "Workspace root containing sessions, templates and profiles"
    )]
    pub workspace_root: Option<PathBuf>,

    #[arg(
        long,
        env = "MEMSHEET_SESSIONS_DIR",
        value_name = "DIR",
        help = "Session directory (default: <workspace_root>/sessions)"
    )]
    pub sessions_dir: Option<PathBuf>,

    #[arg(
        long,
        env = "MEMSHEET_TEMPLATES",
        value_name = "FILE",
        help = "Template set overriding the builtin tables"
    )]
    pub templates_file: Option<PathBuf>,

    #[arg(
        long,
        env = "MEMSHEET_PROFILES",
        value_name = "FILE",
        help = "Prompt profiles merged over the builtin ones"
    )]
    pub profiles_file: Option<PathBuf>,

    #[arg(
        long,
        env = "MEMSHEET_CACHE_CAPACITY",
        value_name = "N",
        help = "Maximum number of sessions kept hydrated in memory",
        value_parser = clap::value_parser!(usize)
    )]
    pub cache_capacity: Option<usize>,

    #[arg(
        long,
        env = "MEMSHEET_MODEL_ENDPOINT",
        value_name = "URL",
        help = "OpenAI-compatible completion endpoint base URL"
    )]
    pub model_endpoint: Option<String>,

    #[arg(
        long,
        env = "MEMSHEET_MODEL",
        value_name = "NAME",
        help = "Model name sent with completion requests"
    )]
    pub model_name: Option<String>,

    #[arg(
        long,
        env = "MEMSHEET_API_KEY",
        value_name = "KEY",
        hide_env_values = true,
        help = "Bearer token for the completion endpoint"
    )]
    pub api_key: Option<String>,

    #[arg(
        long,
        env = "MEMSHEET_TIMEOUT_MS",
        value_name = "MS",
        help = "Completion request timeout in milliseconds (default: 60000; 0 disables)",
        value_parser = clap::value_parser!(u64)
    )]
    pub request_timeout_ms: Option<u64>,

    #[arg(
        long,
        env = "MEMSHEET_TEMPERATURE",
        value_name = "T",
        help = "Sampling temperature for sync requests",
        value_parser = clap::value_parser!(f32)
    )]
    pub temperature: Option<f32>,

    #[arg(
        long,
        env = "MEMSHEET_SYNC_EVERY_N",
        value_name = "N",
        help = "Assistant messages between automatic syncs (default: 3; 0 disables)",
        value_parser = clap::value_parser!(u32)
    )]
    pub sync_every_n: Option<u32>,

    #[arg(
        long,
        env = "MEMSHEET_MAX_CONTEXT_MESSAGES",
        value_name = "N",
        help = "Newest transcript messages included in sync prompts (default: 24; 0 disables)",
        value_parser = clap::value_parser!(u64)
    )]
    pub max_context_messages: Option<u64>,

    #[arg(
        long,
        env = "MEMSHEET_MAX_CONTEXT_TOKENS",
        value_name = "N",
        help = "Estimated token budget for sync prompt context (default: 6000; 0 disables)",
        value_parser = clap::value_parser!(u64)
    )]
    pub max_context_tokens: Option<u64>,

    #[arg(
        long,
        env = "MEMSHEET_SILENT_REBUILD",
        help = "Commit rebuild results without a reviewable proposal"
    )]
    pub silent_rebuild: bool,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
struct PartialConfig {
    workspace_root: Option<PathBuf>,
    sessions_dir: Option<PathBuf>,
    templates_file: Option<PathBuf>,
    profiles_file: Option<PathBuf>,
    cache_capacity: Option<usize>,
    model_endpoint: Option<String>,
    model_name: Option<String>,
    api_key: Option<String>,
    request_timeout_ms: Option<u64>,
    temperature: Option<f32>,
    sync_every_n: Option<u32>,
    max_context_messages: Option<u64>,
    max_context_tokens: Option<u64>,
    silent_rebuild: Option<bool>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}
