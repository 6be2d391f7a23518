//! Secure configuration loading with memory-safe environment variable handling.

use std::collections::HashMap;
use std::env;

use anyhow::{Context, Result};
use secrecy::{ExposeSecret, Secret};
use tracing::{debug, warn};

use crate::providers::{AnthropicProvider, LlmProvider, MockProvider, OpenAiProvider};
use crate::DEFAULT_RATE_LIMIT;

/// Configuration for the LLM gateway with secure secret handling.
#[derive(Debug, Clone)]
pub struct Config {
    provider: ProviderConfig,
    rate_limit: u32,
    timeout_seconds: u64,
    debug_mode: bool,
    additional_settings: HashMap<String, String>,
}

/// Provider-specific configuration with secure secret storage.
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    /// Anthropic Claude configuration.
    Anthropic {
        /// API key (securely stored).
        api_key: Secret<String>,
        /// Model to use, e.g. `"claude-3-5-sonnet-20241022"`.
        model: String,
        /// API base URL, for custom endpoints.
        base_url: Option<String>,
    },
    /// OpenAI GPT configuration.
    OpenAi {
        /// API key (securely stored).
        api_key: Secret<String>,
        /// Model to use, e.g. `"gpt-4"`.
        model: String,
        /// Organization id, if applicable.
        organization: Option<String>,
        /// API base URL, for custom endpoints.
        base_url: Option<String>,
    },
    /// Deterministic in-process provider; never makes a network call.
    Mock {
        /// Fixed response text returned for every request.
        fixed_response: String,
    },
}

/// Secure environment variable loader with automatic cleanup.
pub struct EnvLoader {
    env_cache: HashMap<String, Secret<String>>,
}

impl EnvLoader {
    /// Create a new environment loader.
    ///
    /// # Security
    /// Loads relevant environment variables into a cache that is
    /// zeroized automatically when dropped.
    pub fn new() -> Result<Self> {
        let mut env_cache = HashMap::new();

        let env_vars = [
            "ANTHROPIC_API_KEY",
            "OPENAI_API_KEY",
            "SENTRA_LLM_PROVIDER",
            "SENTRA_LLM_MODEL",
            "SENTRA_LLM_BASE_URL",
            "SENTRA_LLM_RATE_LIMIT",
            "SENTRA_LLM_TIMEOUT",
            "SENTRA_LLM_DEBUG",
            "OPENAI_ORGANIZATION",
        ];

        for var_name in &env_vars {
            if let Ok(value) = env::var(var_name) {
                env_cache.insert(var_name.to_string(), Secret::new(value));
            }
        }

        debug!(count = env_cache.len(), "loaded environment variables into secure cache");

        Ok(Self { env_cache })
    }

    /// Get a required environment variable securely.
    pub fn get_required(&self, key: &str) -> Result<&Secret<String>> {
        self.env_cache.get(key).with_context(|| format!("required environment variable {key} not found"))
    }

    /// Get an optional environment variable securely.
    pub fn get_optional(&self, key: &str) -> Option<&Secret<String>> {
        self.env_cache.get(key)
    }

    /// Get a non-sensitive configuration value.
    pub fn get_public(&self, key: &str) -> Option<String> {
        self.env_cache.get(key).map(|secret| secret.expose_secret().clone())
    }

    /// Parse a numeric environment variable with a default.
    pub fn get_numeric<T>(&self, key: &str, default: T) -> T
    where
        T: std::str::FromStr + Copy,
        T::Err: std::fmt::Display,
    {
        self.get_public(key)
            .and_then(|value| {
                value
                    .parse()
                    .map_err(|e| {
                        warn!(key, error = %e, "failed to parse environment variable as numeric");
                        e
                    })
                    .ok()
            })
            .unwrap_or(default)
    }

    /// Parse a boolean environment variable with a default.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get_public(key)
            .map(|value| matches!(value.to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
            .unwrap_or(default)
    }
}

impl Drop for EnvLoader {
    fn drop(&mut self) {
        for (key, secret) in self.env_cache.drain() {
            debug!(key, "clearing cached environment variable");
            drop(secret);
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// ## Required (provider-specific)
    /// - `ANTHROPIC_API_KEY` — if using Anthropic
    /// - `OPENAI_API_KEY` — if using OpenAI
    ///
    /// ## Optional
    /// - `SENTRA_LLM_PROVIDER` — `"anthropic"` | `"openai"` (default: auto-detect)
    /// - `SENTRA_LLM_MODEL`, `SENTRA_LLM_BASE_URL`, `SENTRA_LLM_RATE_LIMIT`,
    ///   `SENTRA_LLM_TIMEOUT`, `SENTRA_LLM_DEBUG`, `OPENAI_ORGANIZATION`
    ///
    /// # Security
    /// All API keys are stored using `secrecy` and zeroized on drop.
    pub fn from_env() -> Result<Self> {
        Self::from_env_loader(EnvLoader::new().context("failed to create secure environment loader")?)
    }

    /// Load configuration from an already-constructed environment loader,
    /// for dependency injection in tests.
    pub fn from_env_loader(env_loader: EnvLoader) -> Result<Self> {
        let provider_type = env_loader.get_public("SENTRA_LLM_PROVIDER").unwrap_or_else(|| Self::auto_detect_provider(&env_loader));

        debug!(provider = %provider_type, "selected LLM provider");

        let provider = match provider_type.to_lowercase().as_str() {
            "anthropic" => {
                let api_key = env_loader.get_required("ANTHROPIC_API_KEY").context("ANTHROPIC_API_KEY required for Anthropic provider")?.clone();
                let model = env_loader.get_public("SENTRA_LLM_MODEL").unwrap_or_else(|| "claude-3-5-sonnet-20241022".to_string());
                let base_url = env_loader.get_public("SENTRA_LLM_BASE_URL");
                ProviderConfig::Anthropic { api_key, model, base_url }
            }
            "openai" => {
                let api_key = env_loader.get_required("OPENAI_API_KEY").context("OPENAI_API_KEY required for OpenAI provider")?.clone();
                let model = env_loader.get_public("SENTRA_LLM_MODEL").unwrap_or_else(|| "gpt-4".to_string());
                let organization = env_loader.get_public("OPENAI_ORGANIZATION");
                let base_url = env_loader.get_public("SENTRA_LLM_BASE_URL");
                ProviderConfig::OpenAi { api_key, model, organization, base_url }
            }
            unknown => {
                anyhow::bail!("Unknown LLM provider: {unknown}. Supported: anthropic, openai");
            }
        };

        let rate_limit = env_loader.get_numeric("SENTRA_LLM_RATE_LIMIT", DEFAULT_RATE_LIMIT);
        let timeout_seconds = env_loader.get_numeric("SENTRA_LLM_TIMEOUT", 30u64);
        let debug_mode = env_loader.get_bool("SENTRA_LLM_DEBUG", false);

        if debug_mode {
            warn!("debug mode enabled - be careful with sensitive data in logs");
        }

        Ok(Self { provider, rate_limit, timeout_seconds, debug_mode, additional_settings: HashMap::new() })
    }

    /// Build a configuration around the deterministic mock provider, for
    /// tests and demos that must not perform network I/O.
    pub fn for_tests() -> Self {
        Self {
            provider: ProviderConfig::Mock { fixed_response: r#"{"status": "ok"}"#.to_string() },
            rate_limit: DEFAULT_RATE_LIMIT,
            timeout_seconds: 30,
            debug_mode: false,
            additional_settings: HashMap::new(),
        }
    }

    fn auto_detect_provider(env_loader: &EnvLoader) -> String {
        if env_loader.get_optional("ANTHROPIC_API_KEY").is_some() {
            "anthropic".to_string()
        } else if env_loader.get_optional("OPENAI_API_KEY").is_some() {
            "openai".to_string()
        } else {
            "anthropic".to_string()
        }
    }

    /// Create a provider instance from this configuration.
    pub async fn create_provider(&self) -> Result<Box<dyn LlmProvider>> {
        match &self.provider {
            ProviderConfig::Anthropic { api_key, model, base_url } => {
                let provider = AnthropicProvider::new(api_key.clone(), model.clone(), base_url.clone(), self.timeout_seconds).await?;
                Ok(Box::new(provider))
            }
            ProviderConfig::OpenAi { api_key, model, organization, base_url } => {
                let provider = OpenAiProvider::new(api_key.clone(), model.clone(), organization.clone(), base_url.clone(), self.timeout_seconds).await?;
                Ok(Box::new(provider))
            }
            ProviderConfig::Mock { fixed_response } => Ok(Box::new(MockProvider::fixed(fixed_response.clone()))),
        }
    }

    /// Get the provider name for logging and metrics.
    pub fn provider_name(&self) -> &'static str {
        match &self.provider {
            ProviderConfig::Anthropic { .. } => "anthropic",
            ProviderConfig::OpenAi { .. } => "openai",
            ProviderConfig::Mock { .. } => "mock",
        }
    }

    /// Get the configured rate limit.
    pub fn rate_limit(&self) -> u32 {
        self.rate_limit
    }

    /// Get the configured timeout.
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_seconds)
    }

    /// Check if debug mode is enabled.
    pub fn debug_mode(&self) -> bool {
        self.debug_mode
    }

    /// Get the model name being used.
    pub fn model_name(&self) -> &str {
        match &self.provider {
            ProviderConfig::Anthropic { model, .. } => model,
            ProviderConfig::OpenAi { model, .. } => model,
            ProviderConfig::Mock { .. } => "mock",
        }
    }
}

impl Drop for Config {
    fn drop(&mut self) {
        debug!("cleaning up LLM gateway configuration");
    }
}
