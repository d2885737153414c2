use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{IlpaError, Result};

/// Main configuration structure for ILPA
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Storage backend configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Memory buffer and context window configuration
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Completion provider configuration
    #[serde(default)]
    pub completion: CompletionConfig,
}

impl Config {
    /// Load configuration from an explicit path, or from the first default
    /// location that exists. Falls back to defaults when nothing is found.
    ///
    /// Environment overrides are applied after the file is read.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => {
                tracing::info!("Loading config from: {}", path.display());
                Self::from_file(path)?
            }
            None => {
                let found = default_config_paths()
                    .into_iter()
                    .find(|candidate| candidate.exists());

                match found {
                    Some(path) => {
                        tracing::info!("Loading config from: {}", path.display());
                        Self::from_file(&path)?
                    }
                    None => {
                        tracing::info!("No config file found, using defaults");
                        Config::default()
                    }
                }
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            IlpaError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        toml::from_str(&content)
            .map_err(|e| IlpaError::Config(format!("Failed to parse config: {e}")))
    }

    /// Apply environment overrides on top of the file values.
    ///
    /// `lookup` is injected so tests don't have to mutate the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("ILPA_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(addr) = lookup("ILPA_LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }
        if let Some(env) = lookup("ILPA_ENVIRONMENT") {
            self.server.environment = env;
        }
        if let Some(size) = lookup("MEMORY_BUFFER_SIZE") {
            self.memory.buffer_capacity = size.trim().parse().map_err(|e| {
                IlpaError::Config(format!("Invalid MEMORY_BUFFER_SIZE '{size}': {e}"))
            })?;
        }
        Ok(())
    }

    /// Reject configurations the core cannot run with
    pub fn validate(&self) -> Result<()> {
        let memory = &self.memory;
        if memory.buffer_capacity == 0 {
            return Err(IlpaError::Config(
                "memory.buffer_capacity must be positive".to_string(),
            ));
        }
        if memory.context_window == 0 || memory.context_entries == 0 {
            return Err(IlpaError::Config(
                "memory.context_window and memory.context_entries must be positive".to_string(),
            ));
        }
        if memory.cleanup_batch_limit == 0 {
            return Err(IlpaError::Config(
                "memory.cleanup_batch_limit must be positive".to_string(),
            ));
        }

        let completion = &self.completion;
        if completion.max_tokens == 0 {
            return Err(IlpaError::Config(
                "completion.max_tokens must be positive".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&completion.temperature) {
            return Err(IlpaError::Config(format!(
                "completion.temperature must be within 0.0..=2.0, got {}",
                completion.temperature
            )));
        }

        Ok(())
    }
}

fn default_config_paths() -> Vec<PathBuf> {
    [
        dirs::home_dir().map(|h| h.join(".ilpa").join("config.toml")),
        dirs::config_dir().map(|c| c.join("ilpa").join("config.toml")),
        Some(PathBuf::from("config.toml")),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Which storage engine backs the memory buffer and the conversation log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// LanceDB tables under `data_dir`
    #[default]
    Lance,
    /// Process-local, lost on restart
    Memory,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Storage engine
    #[serde(default)]
    pub backend: StorageBackend,
    /// Base directory for all storage data
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".ilpa"))
        .unwrap_or_else(|| PathBuf::from(".ilpa"))
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:8000")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Deployment environment name reported by the health endpoint
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Origins allowed by CORS (empty = allow any)
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    /// Default number of messages returned by the history endpoint
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Upper bound on a caller-supplied history limit
    #[serde(default = "default_max_history_limit")]
    pub max_history_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            environment: default_environment(),
            allowed_origins: default_allowed_origins(),
            history_limit: default_history_limit(),
            max_history_limit: default_max_history_limit(),
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

fn default_history_limit() -> usize {
    50
}

fn default_max_history_limit() -> usize {
    500
}

/// When the retention pass runs relative to the reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReclaimMode {
    /// Spawned after the reply is produced; the caller never waits on it
    #[default]
    Background,
    /// Awaited before the reply is returned; failures are still swallowed
    Inline,
}

/// Memory buffer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MemoryConfig {
    /// Maximum memory entries retained per (user, agent)
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// How many recent entries are fetched when assembling a prompt
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    /// How many of the fetched entries make it into the prompt
    #[serde(default = "default_context_entries")]
    pub context_entries: usize,
    /// Upper bound on entries deleted by a single retention pass
    #[serde(default = "default_cleanup_batch_limit")]
    pub cleanup_batch_limit: usize,
    /// Whether the retention pass runs in the background or inline
    #[serde(default)]
    pub reclaim: ReclaimMode,
    /// Serialize retention passes per (user, agent) for a hard bound
    #[serde(default)]
    pub serialize_cleanup: bool,
}

impl MemoryConfig {
    /// Number of entries that actually reach the prompt.
    ///
    /// `context_entries` is applied to at most `context_window` fetched rows.
    pub fn effective_context_entries(&self) -> usize {
        self.context_entries.min(self.context_window)
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            context_window: default_context_window(),
            context_entries: default_context_entries(),
            cleanup_batch_limit: default_cleanup_batch_limit(),
            reclaim: ReclaimMode::default(),
            serialize_cleanup: false,
        }
    }
}

fn default_buffer_capacity() -> usize {
    100
}

fn default_context_window() -> usize {
    10
}

fn default_context_entries() -> usize {
    5
}

fn default_cleanup_batch_limit() -> usize {
    1000
}

/// Completion API flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompletionProvider {
    /// OpenAI-compatible `/chat/completions`
    #[default]
    OpenAi,
    /// Anthropic `/v1/messages`
    Anthropic,
}

/// Completion provider configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompletionConfig {
    /// API flavour
    #[serde(default)]
    pub provider: CompletionProvider,
    /// API base URL
    #[serde(default = "default_completion_api_url")]
    pub api_url: String,
    /// Environment variable name for API key
    #[serde(default = "default_completion_api_key_env")]
    pub api_key_env: String,
    /// Model identifier
    #[serde(default = "default_completion_model")]
    pub model: String,
    /// Maximum tokens generated per reply
    #[serde(default = "default_completion_max_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature
    #[serde(default = "default_completion_temperature")]
    pub temperature: f32,
    /// HTTP request timeout in seconds
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
    /// Attempts made on rate limiting or transport errors
    #[serde(default = "default_completion_max_retries")]
    pub max_retries: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: CompletionProvider::default(),
            api_url: default_completion_api_url(),
            api_key_env: default_completion_api_key_env(),
            model: default_completion_model(),
            max_tokens: default_completion_max_tokens(),
            temperature: default_completion_temperature(),
            timeout_secs: default_completion_timeout_secs(),
            max_retries: default_completion_max_retries(),
        }
    }
}

fn default_completion_api_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_completion_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_completion_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_completion_max_tokens() -> u32 {
    500
}

fn default_completion_temperature() -> f32 {
    0.7
}

fn default_completion_timeout_secs() -> u64 {
    60
}

fn default_completion_max_retries() -> u32 {
    3
}
