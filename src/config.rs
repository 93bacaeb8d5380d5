use crate::request::Provider;
use crate::resilience::ResiliencePolicy;
use anyhow::{anyhow, Context, Result};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_TIMEOUT_MS: u64 = 300_000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const PERPLEXITY_BASE_URL: &str = "https://api.perplexity.ai";
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Profile-stored keys. Environment and keychain take precedence.
    pub perplexity_api_key: Option<String>,
    pub openrouter_api_key: Option<String>,
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub perplexity_base_url: String,
    pub openrouter_base_url: String,
    /// Whether the OS keychain is consulted for keys.
    pub use_keychain: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            perplexity_api_key: None,
            openrouter_api_key: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            perplexity_base_url: PERPLEXITY_BASE_URL.to_string(),
            openrouter_base_url: OPENROUTER_BASE_URL.to_string(),
            use_keychain: true,
        }
    }
}

impl Config {
    /// Load configuration from file, then apply environment overrides
    pub fn load() -> Result<Self> {
        let config = match Self::load_from_file()? {
            Some(config) => config,
            None => {
                debug!("No config file found, using defaults");
                Self::default()
            }
        };
        config.with_env_overrides(|name| std::env::var(name).ok())
    }

    fn load_from_file() -> Result<Option<Self>> {
        let config_path = Self::get_config_path()?;
        if !config_path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("Invalid config file {}", config_path.display()))?;
        info!("Loaded config from: {}", config_path.display());
        Ok(Some(config))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Applies `PERPLEXITY_TIMEOUT_MS`, `PERPLEXITY_BASE_URL`,
    /// `OPENROUTER_BASE_URL` and `PERPLEXITY_USE_KEYCHAIN` from `lookup`, then
    /// validates the result.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("PERPLEXITY_TIMEOUT_MS") {
            self.timeout_ms = raw.trim().parse().map_err(|_| {
                anyhow!("PERPLEXITY_TIMEOUT_MS must be a positive integer (got '{}')", raw)
            })?;
        }
        if let Some(raw) = lookup("PERPLEXITY_USE_KEYCHAIN") {
            self.use_keychain = parse_flag(&raw).ok_or_else(|| {
                anyhow!("PERPLEXITY_USE_KEYCHAIN must be true or false (got '{}')", raw)
            })?;
        }
        if let Some(url) = lookup("PERPLEXITY_BASE_URL").filter(|u| !u.trim().is_empty()) {
            self.perplexity_base_url = url;
        }
        if let Some(url) = lookup("OPENROUTER_BASE_URL").filter(|u| !u.trim().is_empty()) {
            self.openrouter_base_url = url;
        }

        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(anyhow!("timeout must be greater than zero milliseconds"));
        }
        if self.max_attempts == 0 {
            return Err(anyhow!("max_attempts must be at least 1"));
        }
        Ok(())
    }

    fn get_config_path() -> Result<PathBuf> {
        Ok(Self::get_config_dir()?.join("config.toml"))
    }

    pub fn get_config_dir() -> Result<PathBuf> {
        let home = home_dir().ok_or_else(|| anyhow!("Could not find home directory"))?;
        Ok(home.join(".perplexity"))
    }

    /// Base URL for the provider, without a trailing slash.
    pub fn base_url(&self, provider: Provider) -> &str {
        let url = match provider {
            Provider::Perplexity => &self.perplexity_base_url,
            Provider::OpenRouter => &self.openrouter_base_url,
        };
        url.trim_end_matches('/')
    }

    /// Profile-stored key for the provider.
    pub fn profile_key(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::Perplexity => self.perplexity_api_key.as_deref(),
            Provider::OpenRouter => self.openrouter_api_key.as_deref(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn resilience_policy(&self) -> ResiliencePolicy {
        ResiliencePolicy {
            deadline: self.timeout(),
            max_attempts: self.max_attempts,
            ..ResiliencePolicy::default()
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
