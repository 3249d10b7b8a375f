//! Configuration management for trae_config.toml

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheConfig;
use crate::gateway::ModelSettings;
use crate::retry::RetryConfig;

/// Default configuration file name
pub const CONFIG_FILE_NAME: &str = "trae_config.toml";

/// Agent used when none is named
pub const DEFAULT_AGENT: &str = "trae_agent";

/// Providers reachable without a credential
const KEYLESS_PROVIDERS: &[&str] = &["ollama"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} not found in current directory or parents")]
    NotFound(String),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("agent '{0}' is not configured")]
    MissingAgent(String),

    #[error("model '{0}' is not configured")]
    MissingModel(String),

    #[error("model provider '{0}' is not configured")]
    MissingProvider(String),

    #[error("no API key for provider '{provider}': set {env_var} or api_key in the config")]
    MissingApiKey { provider: String, env_var: String },

    #[error("invalid {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Top-level file layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraeConfig {
    #[serde(default)]
    pub agents: BTreeMap<String, AgentSection>,
    #[serde(default)]
    pub model_providers: BTreeMap<String, ProviderSection>,
    #[serde(default)]
    pub models: BTreeMap<String, ModelSection>,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub cache: CacheSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    pub model: String,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Tool allow-list; empty means every built-in tool
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSection {
    pub provider: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSection {
    pub model: String,
    pub model_provider: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub top_k: u32,
    #[serde(default)]
    pub parallel_tool_calls: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_true")]
    pub supports_tool_calling: bool,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_size")]
    pub max_size: usize,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: default_cache_size(),
            ttl_secs: default_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

fn default_max_steps() -> usize {
    20
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_temperature() -> f32 {
    0.5
}
fn default_top_p() -> f32 {
    1.0
}
fn default_max_retries() -> u32 {
    3
}
fn default_true() -> bool {
    true
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_call_timeout_secs() -> u64 {
    120
}
fn default_cache_size() -> usize {
    1000
}
fn default_ttl_secs() -> u64 {
    3600
}
fn default_cleanup_interval_secs() -> u64 {
    600
}

/// Command-line overrides; each wins over environment and file values
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub max_steps: Option<usize>,
}

/// Fully resolved settings for one model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub parallel_tool_calls: bool,
    pub max_retries: u32,
    pub supports_tool_calling: bool,
    pub stop_sequences: Vec<String>,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub base_url: Option<String>,
    pub api_version: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: 0,
            parallel_tool_calls: false,
            max_retries: default_max_retries(),
            supports_tool_calling: true,
            stop_sequences: Vec::new(),
            api_key: String::new(),
            base_url: None,
            api_version: None,
        }
    }
}

impl ModelConfig {
    /// API key shortened for display
    pub fn masked_api_key(&self) -> String {
        mask_secret(&self.api_key)
    }
}

impl ModelSettings for ModelConfig {
    fn provider(&self) -> &str {
        &self.provider
    }
    fn model(&self) -> &str {
        &self.model
    }
    fn max_tokens(&self) -> u32 {
        self.max_tokens
    }
    fn temperature(&self) -> f32 {
        self.temperature
    }
    fn top_p(&self) -> f32 {
        self.top_p
    }
    fn top_k(&self) -> u32 {
        self.top_k
    }
    fn parallel_tool_calls(&self) -> bool {
        self.parallel_tool_calls
    }
    fn max_retries(&self) -> u32 {
        self.max_retries
    }
    fn supports_tool_calling(&self) -> bool {
        self.supports_tool_calling
    }
    fn api_key(&self) -> &str {
        &self.api_key
    }
    fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }
    fn api_version(&self) -> Option<&str> {
        self.api_version.as_deref()
    }
    fn stop_sequences(&self) -> &[String] {
        &self.stop_sequences
    }
}

/// Everything needed to build a gateway stack and an agent
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub agent: String,
    pub model: ModelConfig,
    pub max_steps: usize,
    pub tools: Vec<String>,
    pub system_prompt: Option<String>,
    pub retry: RetryConfig,
    pub call_timeout: Duration,
    /// `None` when caching is disabled
    pub cache: Option<CacheConfig>,
}

/// Keep the first 8 characters of a secret
pub fn mask_secret(secret: &str) -> String {
    if secret.is_empty() {
        return "(not set)".to_string();
    }
    let prefix: String = secret.chars().take(8).collect();
    format!("{prefix}...")
}

fn env_var_name(provider: &str, suffix: &str) -> String {
    format!("{}_{}", provider.to_uppercase().replace('-', "_"), suffix)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl TraeConfig {
    /// Load from an explicit path, or search upwards for trae_config.toml
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) if p.exists() => Self::load_from(p),
            Some(p) if p.components().count() > 1 => Err(ConfigError::NotFound(p.display().to_string())),
            Some(p) => {
                let name = p.to_string_lossy();
                Self::load_from(Self::find_config_path(&name)?)
            }
            None => Self::load_from(Self::find_config_path(CONFIG_FILE_NAME)?),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Find a config file by searching the current directory and parents
    pub fn find_config_path(file_name: &str) -> Result<PathBuf, ConfigError> {
        let mut current = std::env::current_dir().map_err(|source| ConfigError::Read {
            path: PathBuf::from("."),
            source,
        })?;

        for _ in 0..10 {
            let candidate = current.join(file_name);
            if candidate.exists() {
                return Ok(candidate);
            }
            if !current.pop() {
                break;
            }
        }

        Err(ConfigError::NotFound(file_name.to_string()))
    }

    /// Structural checks: every reference resolves and values are in range
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agents.is_empty() {
            return Err(ConfigError::invalid("agents", "at least one agent must be configured"));
        }

        for (name, agent) in &self.agents {
            if agent.model.is_empty() {
                return Err(ConfigError::invalid(format!("agents.{name}.model"), "must not be empty"));
            }
            if !self.models.contains_key(&agent.model) {
                return Err(ConfigError::MissingModel(agent.model.clone()));
            }
            if agent.max_steps == 0 {
                return Err(ConfigError::invalid(format!("agents.{name}.max_steps"), "must be at least 1"));
            }
        }

        for (name, model) in &self.models {
            if model.model.is_empty() {
                return Err(ConfigError::invalid(format!("models.{name}.model"), "must not be empty"));
            }
            if !self.model_providers.contains_key(&model.model_provider) {
                return Err(ConfigError::MissingProvider(model.model_provider.clone()));
            }
            if !(0.0..=2.0).contains(&model.temperature) {
                return Err(ConfigError::invalid(format!("models.{name}.temperature"), "must be within 0.0..=2.0"));
            }
            if !(0.0..=1.0).contains(&model.top_p) {
                return Err(ConfigError::invalid(format!("models.{name}.top_p"), "must be within 0.0..=1.0"));
            }
        }

        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::invalid("retry.backoff_multiplier", "must be at least 1.0"));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::invalid("retry.max_delay_ms", "must not be below base_delay_ms"));
        }
        if self.retry.call_timeout_secs == 0 {
            return Err(ConfigError::invalid("retry.call_timeout_secs", "must be at least 1"));
        }
        if self.cache.enabled && self.cache.max_size == 0 {
            return Err(ConfigError::invalid("cache.max_size", "must be at least 1 when caching is enabled"));
        }

        Ok(())
    }

    /// Resolve an agent against the process environment
    pub fn resolve(&self, agent: &str, overrides: &Overrides) -> Result<ResolvedConfig, ConfigError> {
        self.resolve_with_env(agent, overrides, |key| std::env::var(key).ok())
    }

    /// Resolve an agent; `env` looks up environment variables.
    ///
    /// Precedence for credentials and endpoints: override, then
    /// `<PROVIDER>_API_KEY` / `<PROVIDER>_BASE_URL`, then the file.
    pub fn resolve_with_env<F>(&self, agent: &str, overrides: &Overrides, env: F) -> Result<ResolvedConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let agent_section = self
            .agents
            .get(agent)
            .ok_or_else(|| ConfigError::MissingAgent(agent.to_string()))?;
        let model_section = self
            .models
            .get(&agent_section.model)
            .ok_or_else(|| ConfigError::MissingModel(agent_section.model.clone()))?;

        let provider_key = non_empty(overrides.provider.clone()).unwrap_or_else(|| model_section.model_provider.clone());
        let provider = match self.model_providers.get(&provider_key) {
            Some(p) => p.clone(),
            None if overrides.provider.is_some() => ProviderSection {
                provider: provider_key.clone(),
                api_key: String::new(),
                base_url: None,
                api_version: None,
            },
            None => return Err(ConfigError::MissingProvider(provider_key)),
        };

        let key_var = env_var_name(&provider.provider, "API_KEY");
        let url_var = env_var_name(&provider.provider, "BASE_URL");

        let api_key = non_empty(overrides.api_key.clone())
            .or_else(|| non_empty(env(&key_var)))
            .unwrap_or_else(|| provider.api_key.clone());
        let base_url = non_empty(overrides.base_url.clone())
            .or_else(|| non_empty(env(&url_var)))
            .or_else(|| provider.base_url.clone());

        if api_key.is_empty() && !KEYLESS_PROVIDERS.contains(&provider.provider.as_str()) {
            return Err(ConfigError::MissingApiKey {
                provider: provider.provider.clone(),
                env_var: key_var,
            });
        }

        let max_steps = overrides.max_steps.unwrap_or(agent_section.max_steps);
        if max_steps == 0 {
            return Err(ConfigError::invalid("max_steps", "must be at least 1"));
        }

        let model = ModelConfig {
            provider: provider.provider.clone(),
            model: non_empty(overrides.model.clone()).unwrap_or_else(|| model_section.model.clone()),
            max_tokens: model_section.max_tokens,
            temperature: model_section.temperature,
            top_p: model_section.top_p,
            top_k: model_section.top_k,
            parallel_tool_calls: model_section.parallel_tool_calls,
            max_retries: model_section.max_retries,
            supports_tool_calling: model_section.supports_tool_calling,
            stop_sequences: model_section.stop_sequences.clone(),
            api_key,
            base_url,
            api_version: provider.api_version.clone(),
        };

        let retry = RetryConfig {
            max_retries: model.max_retries,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            backoff_multiplier: self.retry.backoff_multiplier,
        };

        let cache = self.cache.enabled.then(|| CacheConfig {
            max_size: self.cache.max_size,
            ttl: Duration::from_secs(self.cache.ttl_secs),
            cleanup_interval: Duration::from_secs(self.cache.cleanup_interval_secs),
        });

        Ok(ResolvedConfig {
            agent: agent.to_string(),
            model,
            max_steps,
            tools: agent_section.tools.clone(),
            system_prompt: agent_section.system_prompt.clone(),
            retry,
            call_timeout: Duration::from_secs(self.retry.call_timeout_secs),
            cache,
        })
    }
}
