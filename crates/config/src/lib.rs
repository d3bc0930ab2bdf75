//! Configuration loading, validation, and management for Spindle.
//!
//! Loads configuration from `~/.spindle/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use spindle_core::server::ToolServer;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found at {0}")]
    NotFound(PathBuf),

    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// The root configuration structure.
///
/// Maps directly to `~/.spindle/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Provider API key (overridable via SPINDLE_API_KEY)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Summarizer (compaction) configuration
    #[serde(default)]
    pub summarizer: SummarizerConfig,

    /// Skills catalog configuration
    #[serde(default)]
    pub skills: SkillsConfig,

    /// Remote tool server descriptors
    #[serde(default)]
    pub tool_servers: Vec<ToolServer>,
}

fn default_api_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("storage", &self.storage)
            .field("summarizer", &self.summarizer)
            .field("skills", &self.skills)
            .field("tool_servers", &self.tool_servers)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            storage: StorageConfig::default(),
            summarizer: SummarizerConfig::default(),
            skills: SkillsConfig::default(),
            tool_servers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "~/.spindle/chats.db".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    /// Unsummarized user/assistant messages before compaction triggers
    #[serde(default = "default_summary_threshold")]
    pub threshold: usize,

    /// Oldest messages folded per compaction run
    #[serde(default = "default_summary_batch")]
    pub batch_size: usize,
}

fn default_summary_threshold() -> usize {
    10
}
fn default_summary_batch() -> usize {
    10
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            threshold: default_summary_threshold(),
            batch_size: default_summary_batch(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillsConfig {
    /// URL of the skill catalog index document; None disables skills
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_url: Option<String>,

    /// Cache time-to-live in seconds
    #[serde(default = "default_skill_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_skill_ttl_secs() -> u64 {
    3600
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            index_url: None,
            ttl_secs: default_skill_ttl_secs(),
        }
    }
}

impl AppConfig {
    /// The default config file location: `~/.spindle/config.toml`.
    pub fn default_path() -> PathBuf {
        dirs_home()
            .join(".spindle")
            .join("config.toml")
    }

    /// Load configuration from a file, apply environment overrides, and
    /// validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path)?;
        let mut config: AppConfig = toml::from_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides (secrets stay out of the
    /// config file this way).
    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("SPINDLE_API_KEY") {
            if !key.is_empty() {
                self.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("SPINDLE_API_URL") {
            if !url.is_empty() {
                self.api_url = url;
            }
        }
    }

    /// Validate settings at startup — fail fast on nonsense values.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_model.is_empty() {
            return Err(ConfigError::Invalid("default_model must not be empty".into()));
        }
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(ConfigError::Invalid(format!(
                "default_temperature must be in [0.0, 2.0], got {}",
                self.default_temperature
            )));
        }
        if self.summarizer.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "summarizer.batch_size must be at least 1".into(),
            ));
        }
        if self.summarizer.threshold == 0 {
            return Err(ConfigError::Invalid(
                "summarizer.threshold must be at least 1".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for server in &self.tool_servers {
            if server.id.is_empty() {
                return Err(ConfigError::Invalid("tool server id must not be empty".into()));
            }
            if !seen.insert(&server.id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate tool server id: {}",
                    server.id
                )));
            }
        }
        Ok(())
    }

    /// Serialize this config back to TOML (for `onboard`).
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Invalid(format!("serialize: {e}")))
    }
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let (_dir, path) = write_config("api_key = \"sk-test\"\n");
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.summarizer.threshold, 10);
        assert_eq!(config.summarizer.batch_size, 10);
        assert_eq!(config.skills.ttl_secs, 3600);
        assert!(config.tool_servers.is_empty());
    }

    #[test]
    fn tool_servers_parse_both_transports() {
        let (_dir, path) = write_config(
            r#"
api_key = "sk-test"

[[tool_servers]]
id = "srv_files"
name = "File Tools"
transport = "http"
endpoint = "http://localhost:9090/rpc"

[[tool_servers]]
id = "srv_local"
name = "local"
transport = "process"
command = "/usr/bin/toolsrv"
args = ["--stdio"]
enabled = false
"#,
        );
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.tool_servers.len(), 2);
        assert!(config.tool_servers[0].enabled);
        assert!(!config.tool_servers[1].enabled);
    }

    #[test]
    fn duplicate_server_ids_rejected() {
        let (_dir, path) = write_config(
            r#"
[[tool_servers]]
id = "srv_a"
name = "a"
transport = "http"
endpoint = "http://localhost:1/rpc"

[[tool_servers]]
id = "srv_a"
name = "a again"
transport = "http"
endpoint = "http://localhost:2/rpc"
"#,
        );
        let err = AppConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_batch_size_rejected() {
        let (_dir, path) = write_config("[summarizer]\nbatch_size = 0\n");
        let err = AppConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = AppConfig::load(Path::new("/definitely/missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("sk-very-secret".into()),
            ..AppConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-very-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn default_config_round_trips() {
        let config = AppConfig::default();
        let toml = config.to_toml().unwrap();
        let parsed: AppConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.default_model, config.default_model);
    }
}
