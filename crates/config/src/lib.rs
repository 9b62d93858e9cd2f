//! Configuration loading, validation, and management for Concierge.
//!
//! Loads configuration from `~/.concierge/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use concierge_core::StateConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.concierge/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// LLM provider used by the planner
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Plan/act loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// State size limits and retrieval settings
    #[serde(default)]
    pub context: ContextConfig,

    /// Resume-or-start policy
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Background pipeline
    #[serde(default)]
    pub background: BackgroundConfig,

    /// Conversation state and long-term memory storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Long-term memory learning and lifecycle
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Turn telemetry
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider name ("openrouter", "openai", "ollama", ...)
    #[serde(default = "default_provider")]
    pub name: String,

    /// Base URL override for OpenAI-compatible endpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    1024
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider(),
            api_url: None,
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Plan/act iterations before the planner is forced to finish
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    #[serde(default = "default_planner_timeout")]
    pub planner_timeout_secs: u64,

    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Replaces the built-in planner instructions when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_max_steps() -> u32 {
    6
}
fn default_planner_timeout() -> u64 {
    60
}
fn default_tool_timeout() -> u64 {
    30
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            planner_timeout_secs: default_planner_timeout(),
            tool_timeout_secs: default_tool_timeout(),
            system_prompt: None,
        }
    }
}

impl AgentConfig {
    pub fn planner_timeout(&self) -> Duration {
        Duration::from_secs(self.planner_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Size limits copied into every new `AgentState`
    #[serde(flatten)]
    pub state: StateConfig,

    /// Records requested from long-term memory per turn
    #[serde(default = "default_ltm_limit")]
    pub ltm_limit: usize,

    /// Documents requested from the knowledge base per turn
    #[serde(default = "default_rag_limit")]
    pub rag_limit: usize,

    /// Rerank long-term memory against the turn's focus before injection
    #[serde(default = "default_true")]
    pub optimize: bool,
}

fn default_ltm_limit() -> usize {
    8
}
fn default_rag_limit() -> usize {
    5
}
fn default_true() -> bool {
    true
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            state: StateConfig::default(),
            ltm_limit: default_ltm_limit(),
            rag_limit: default_rag_limit(),
            optimize: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Inactivity after which a new conversation is started
    #[serde(default = "default_resume_window")]
    pub resume_window_minutes: u64,
}

fn default_resume_window() -> u64 {
    30
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            resume_window_minutes: default_resume_window(),
        }
    }
}

impl ConversationConfig {
    pub fn resume_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::try_from(self.resume_window_minutes).unwrap_or(i64::MAX / 60_000))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Extra attempts after a failed state save
    #[serde(default = "default_persist_retries")]
    pub persist_retries: u32,

    /// Base delay between persist attempts (multiplied by the attempt number)
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

fn default_workers() -> usize {
    2
}
fn default_queue_capacity() -> usize {
    64
}
fn default_persist_retries() -> u32 {
    2
}
fn default_retry_backoff() -> u64 {
    200
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            persist_retries: default_persist_retries(),
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "sqlite" or "memory"
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// SQLite database file (defaults to `~/.concierge/concierge.db`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlite_path: Option<PathBuf>,

    /// Long-term memory JSONL file (defaults to `~/.concierge/memories.jsonl`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_path: Option<PathBuf>,

    /// Directory of `.md`/`.txt` files served as shared knowledge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_dir: Option<PathBuf>,
}

fn default_storage_backend() -> String {
    "sqlite".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            sqlite_path: None,
            memory_path: None,
            knowledge_dir: None,
        }
    }
}

impl StorageConfig {
    pub fn resolved_sqlite_path(&self) -> PathBuf {
        self.sqlite_path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("concierge.db"))
    }

    pub fn resolved_memory_path(&self) -> PathBuf {
        self.memory_path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("memories.jsonl"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Store substantive exchanges without an explicit request
    #[serde(default = "default_true")]
    pub auto_save: bool,

    /// Importance lost per idle day
    #[serde(default = "default_decay")]
    pub decay_per_day: f32,

    /// Entries whose importance falls below this are archived
    #[serde(default = "default_archive_threshold")]
    pub archive_threshold: f32,
}

fn default_decay() -> f32 {
    0.02
}
fn default_archive_threshold() -> f32 {
    0.1
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            auto_save: true,
            decay_per_day: default_decay(),
            archive_threshold: default_archive_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Completed turn traces kept in memory
    #[serde(default = "default_max_traces")]
    pub max_traces: usize,
}

fn default_max_traces() -> usize {
    500
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_traces: default_max_traces(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.concierge/config.toml).
    ///
    /// Also checks environment variables for API keys:
    /// - `CONCIERGE_API_KEY` (highest priority)
    /// - `OPENROUTER_API_KEY`
    /// - `OPENAI_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if self.provider.api_key.is_none() {
            self.provider.api_key = std::env::var("CONCIERGE_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(provider) = std::env::var("CONCIERGE_PROVIDER") {
            self.provider.name = provider;
        }

        if let Ok(model) = std::env::var("CONCIERGE_MODEL") {
            self.provider.model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".concierge")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError("agent.max_steps must be > 0".into()));
        }

        if self.agent.planner_timeout_secs == 0 || self.agent.tool_timeout_secs == 0 {
            return Err(ConfigError::ValidationError("agent timeouts must be > 0".into()));
        }

        let state = &self.context.state;
        if state.max_history_messages == 0 {
            return Err(ConfigError::ValidationError(
                "context.max_history_messages must be > 0".into(),
            ));
        }
        if state.max_history_bytes < 1024 {
            return Err(ConfigError::ValidationError(
                "context.max_history_bytes must be at least 1024".into(),
            ));
        }
        if !(0.0..=1.0).contains(&state.min_relevance) {
            return Err(ConfigError::ValidationError(
                "context.min_relevance must be between 0.0 and 1.0".into(),
            ));
        }

        if self.background.workers == 0 || self.background.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "background.workers and background.queue_capacity must be > 0".into(),
            ));
        }

        match self.storage.backend.as_str() {
            "sqlite" | "memory" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "storage.backend must be \"sqlite\" or \"memory\", got \"{other}\""
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.memory.archive_threshold) || self.memory.decay_per_day < 0.0 {
            return Err(ConfigError::ValidationError(
                "memory.archive_threshold must be in 0.0..=1.0 and decay_per_day >= 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.provider.name, "openrouter");
        assert_eq!(config.conversation.resume_window_minutes, 30);
        assert_eq!(config.context.state.max_history_messages, 40);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.provider.model, config.provider.model);
        assert_eq!(parsed.context.state, config.context.state);
        assert_eq!(parsed.background.workers, config.background.workers);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let toml_str = r#"
[agent]
max_steps = 3

[context]
context_injection_limit = 1500
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.agent.max_steps, 3);
        assert_eq!(config.agent.tool_timeout_secs, 30);
        assert_eq!(config.context.state.context_injection_limit, 1500);
        assert_eq!(config.context.state.memory_context_limit, 6_000);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.provider.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn tiny_history_budget_rejected() {
        let mut config = AppConfig::default();
        config.context.state.max_history_bytes = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_storage_backend_rejected() {
        let mut config = AppConfig::default();
        config.storage.backend = "postgres".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("postgres"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.provider.name, "openrouter");
    }

    #[test]
    fn load_from_file_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[agent]\nmax_steps = 0\n").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ValidationError(_))
        ));

        std::fs::write(&path, "[agent\n").unwrap();
        assert!(matches!(AppConfig::load_from(&path), Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn debug_redacts_api_key() {
        let mut config = AppConfig::default();
        config.provider.api_key = Some("sk-secret-value".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret-value"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("openrouter"));
        assert!(toml_str.contains("resume_window_minutes"));
    }
}
