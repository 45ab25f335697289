//! Application configuration for SpecWeaver.
//!
//! User config lives at `~/.specweaver/specweaver.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpecWeaverError};
use crate::types::Layer;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "specweaver.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".specweaver";

// ---------------------------------------------------------------------------
// Config structs (matching specweaver.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// OpenRouter settings.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// Document chunking and indexing.
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Retry and throttling policy for generation calls.
    #[serde(default)]
    pub invocation: InvocationConfig,

    /// Artifact validation gate.
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Directory layout of generated artifacts.
    #[serde(default)]
    pub layers: LayerConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Where the chunk index and stage outputs live.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Root directory for generated artifacts.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Chunks retrieved per extraction stage.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Chunks retrieved per generated artifact.
    #[serde(default = "default_artifact_top_k")]
    pub artifact_top_k: usize,

    /// Characters of retrieved context handed to each artifact prompt.
    #[serde(default = "default_artifact_context_chars")]
    pub artifact_context_chars: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            output_dir: default_output_dir(),
            top_k: default_top_k(),
            artifact_top_k: default_artifact_top_k(),
            artifact_context_chars: default_artifact_context_chars(),
        }
    }
}

fn default_data_dir() -> String {
    "specweaver-data".into()
}
fn default_output_dir() -> String {
    "generated_src".into()
}
fn default_top_k() -> usize {
    5
}
fn default_artifact_top_k() -> usize {
    2
}
fn default_artifact_context_chars() -> usize {
    500
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used for every generation call.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Base URL of the OpenAI-compatible API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "google/gemini-2.5-flash".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1/".into()
}
fn default_timeout_secs() -> u64 {
    120
}

/// How re-indexing a document treats its previous chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexMode {
    /// Drop the document's existing chunks before inserting new ones.
    #[default]
    Replace,
    /// Keep existing chunks and continue the document's position counter.
    Append,
}

/// `[chunking]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum characters per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters shared by consecutive chunks.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    #[serde(default)]
    pub index_mode: IndexMode,

    /// Width of the hashed embedding vectors.
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            index_mode: IndexMode::default(),
            embedding_dimensions: default_embedding_dimensions(),
        }
    }
}

impl ChunkingConfig {
    /// Reject settings the splitter cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size < 2 {
            return Err(SpecWeaverError::validation("chunk_size must be at least 2"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(SpecWeaverError::validation(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.embedding_dimensions == 0 {
            return Err(SpecWeaverError::validation(
                "embedding_dimensions must be positive",
            ));
        }
        Ok(())
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    100
}
fn default_embedding_dimensions() -> usize {
    384
}

/// `[invocation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationConfig {
    /// Calls allowed for one prompt while being rate limited.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Upper bound on a single rate-limit sleep.
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,

    /// Sleep used when a rate limit carries no retry hint.
    #[serde(default = "default_wait_secs")]
    pub default_wait_secs: u64,

    /// Retry hints longer than this are treated as quota exhaustion.
    #[serde(default = "default_quota_threshold_secs")]
    pub quota_threshold_secs: u64,

    /// Fixed delay before the single reconnect attempt.
    #[serde(default = "default_connection_retry_delay_secs")]
    pub connection_retry_delay_secs: u64,

    /// Minimum spacing between consecutive calls.
    #[serde(default = "default_min_call_interval_ms")]
    pub min_call_interval_ms: u64,
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            max_wait_secs: default_max_wait_secs(),
            default_wait_secs: default_wait_secs(),
            quota_threshold_secs: default_quota_threshold_secs(),
            connection_retry_delay_secs: default_connection_retry_delay_secs(),
            min_call_interval_ms: default_min_call_interval_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_max_wait_secs() -> u64 {
    60
}
fn default_wait_secs() -> u64 {
    5
}
fn default_quota_threshold_secs() -> u64 {
    300
}
fn default_connection_retry_delay_secs() -> u64 {
    2
}
fn default_min_call_interval_ms() -> u64 {
    1000
}

/// `[validation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Artifacts at or below this many characters are placeholders.
    #[serde(default = "default_min_content_length")]
    pub min_content_length: usize,

    /// Extra generation rounds after a rejected artifact.
    #[serde(default = "default_max_regenerations")]
    pub max_regenerations: u32,

    /// Identifier suffixes that signal an invented name.
    #[serde(default = "default_suspect_suffixes")]
    pub suspect_suffixes: Vec<String>,

    /// Regex whose first capture group is the primary identifier.
    #[serde(default = "default_identifier_pattern")]
    pub identifier_pattern: String,

    /// Regex matching one behaviour unit.
    #[serde(default = "default_behavior_pattern")]
    pub behavior_pattern: String,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_content_length: default_min_content_length(),
            max_regenerations: default_max_regenerations(),
            suspect_suffixes: default_suspect_suffixes(),
            identifier_pattern: default_identifier_pattern(),
            behavior_pattern: default_behavior_pattern(),
        }
    }
}

fn default_min_content_length() -> usize {
    200
}
fn default_max_regenerations() -> u32 {
    2
}
fn default_suspect_suffixes() -> Vec<String> {
    ["Model", "Entity", "DTO", "Schema", "Info", "Data"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_identifier_pattern() -> String {
    r"class\s+(\w+)".into()
}
fn default_behavior_pattern() -> String {
    r"\bdef\s+\w+".into()
}

/// `[layers]` section: one directory per architectural layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerConfig {
    #[serde(default = "default_data_dir_name")]
    pub data: String,

    #[serde(default = "default_coordination_dir_name")]
    pub coordination: String,

    #[serde(default = "default_presentation_dir_name")]
    pub presentation: String,

    /// Extension of generated source files, without the dot.
    #[serde(default = "default_extension")]
    pub extension: String,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            data: default_data_dir_name(),
            coordination: default_coordination_dir_name(),
            presentation: default_presentation_dir_name(),
            extension: default_extension(),
        }
    }
}

impl LayerConfig {
    /// Directory name that holds artifacts of `layer`.
    pub fn dir_for(&self, layer: Layer) -> &str {
        match layer {
            Layer::Data => &self.data,
            Layer::Coordination => &self.coordination,
            Layer::Presentation => &self.presentation,
        }
    }

    /// Layer owning a directory name, if any.
    pub fn layer_for_dir(&self, dir: &str) -> Option<Layer> {
        Layer::ALL.into_iter().find(|l| self.dir_for(*l) == dir)
    }
}

fn default_data_dir_name() -> String {
    "models".into()
}
fn default_coordination_dir_name() -> String {
    "controllers".into()
}
fn default_presentation_dir_name() -> String {
    "views".into()
}
fn default_extension() -> String {
    "py".into()
}

// ---------------------------------------------------------------------------
// Retry policy (runtime, derived from [invocation])
// ---------------------------------------------------------------------------

/// Runtime retry policy with concrete durations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub max_wait: Duration,
    pub default_wait: Duration,
    pub quota_threshold: Duration,
    pub connection_retry_delay: Duration,
    pub min_call_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&InvocationConfig::default())
    }
}

impl From<&InvocationConfig> for RetryPolicy {
    fn from(config: &InvocationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            max_wait: Duration::from_secs(config.max_wait_secs),
            default_wait: Duration::from_secs(config.default_wait_secs),
            quota_threshold: Duration::from_secs(config.quota_threshold_secs),
            connection_retry_delay: Duration::from_secs(config.connection_retry_delay_secs),
            min_call_interval: Duration::from_millis(config.min_call_interval_ms),
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps, keeping classification thresholds intact.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            max_wait: Duration::ZERO,
            default_wait: Duration::ZERO,
            connection_retry_delay: Duration::ZERO,
            min_call_interval: Duration::ZERO,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

impl AppConfig {
    /// Resolved data directory.
    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.defaults.data_dir)
    }

    /// Resolved artifact output directory.
    pub fn output_dir(&self) -> PathBuf {
        expand_home(&self.defaults.output_dir)
    }

    /// Path of the chunk index database.
    pub fn index_path(&self) -> PathBuf {
        self.data_dir().join("index.db")
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.specweaver/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| SpecWeaverError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.specweaver/specweaver.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SpecWeaverError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        SpecWeaverError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.chunking.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| SpecWeaverError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| SpecWeaverError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| SpecWeaverError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the OpenRouter API key from the configured env var.
pub fn api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.openrouter.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(SpecWeaverError::config(format!(
            "OpenRouter API key not found. Set the {var_name} environment variable.\n\
             Get a key at https://openrouter.ai/keys"
        ))),
    }
}
