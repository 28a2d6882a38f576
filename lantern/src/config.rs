//! Process configuration from the environment.
//!
//! Values come from environment variables, optionally seeded from a `.env`
//! file with [`load_dotenv`]. Reading goes through a lookup function so tests
//! never touch the real process environment.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use lantern_workflows::DEFAULT_MODEL;

pub const ENV_HOST: &str = "LANGFUSE_HOST";
pub const ENV_PUBLIC_KEY: &str = "LANGFUSE_PUBLIC_KEY";
pub const ENV_SECRET_KEY: &str = "LANGFUSE_SECRET_KEY";
pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_MODEL: &str = "OPENAI_MODEL";
pub const ENV_BASE_URL: &str = "OPENAI_BASE_URL";
pub const ENV_FLUSH_TIMEOUT_MS: &str = "LANTERN_FLUSH_TIMEOUT_MS";

pub const DEFAULT_HOST: &str = "https://cloud.langfuse.com";
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration errors, reported at startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Every required variable that was unset or empty.
    #[error("missing required environment variables: {}", .0.join(", "))]
    MissingVariables(Vec<&'static str>),
    #[error("invalid value for {var}: {reason}")]
    InvalidValue { var: &'static str, reason: String },
}

/// Loads `.env` from the current directory or its parents, if there is one.
///
/// Variables already set in the environment win.
pub fn load_dotenv() -> Option<PathBuf> {
    match dotenvy::dotenv() {
        Ok(path) => {
            tracing::debug!(path = %path.display(), "loaded .env");
            Some(path)
        }
        Err(err) if err.not_found() => None,
        Err(err) => {
            tracing::warn!(error = %err, "ignoring unreadable .env");
            None
        }
    }
}

/// Everything a [`Session`](crate::Session) needs to start.
#[derive(Clone, PartialEq, Eq)]
pub struct LanternConfig {
    /// Base URL of the trace ingestion service.
    pub endpoint_url: String,
    pub public_key: String,
    pub secret_key: String,
    pub provider_api_key: String,
    pub model_name: String,
    /// Overrides the OpenAI base URL (for compatible gateways).
    pub provider_base_url: Option<String>,
    pub flush_timeout: Duration,
    /// Use the scripted provider and write traces to a local bundle only.
    pub offline: bool,
    /// Directory under which `traces/<bundle_id>/` is created.
    pub bundle_dir: Option<PathBuf>,
}

impl fmt::Debug for LanternConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LanternConfig")
            .field("endpoint_url", &self.endpoint_url)
            .field("public_key", &self.public_key)
            .field("secret_key", &"<redacted>")
            .field("provider_api_key", &"<redacted>")
            .field("model_name", &self.model_name)
            .field("provider_base_url", &self.provider_base_url)
            .field("flush_timeout", &self.flush_timeout)
            .field("offline", &self.offline)
            .field("bundle_dir", &self.bundle_dir)
            .finish()
    }
}

impl LanternConfig {
    pub fn builder() -> LanternConfigBuilder {
        LanternConfigBuilder::new()
    }

    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads variables through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        LanternConfigBuilder::from_lookup(lookup)?.build()
    }

    /// A configuration that needs no credentials.
    pub fn offline() -> Self {
        Self {
            endpoint_url: DEFAULT_HOST.to_string(),
            public_key: String::new(),
            secret_key: String::new(),
            provider_api_key: String::new(),
            model_name: DEFAULT_MODEL.to_string(),
            provider_base_url: None,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            offline: true,
            bundle_dir: None,
        }
    }
}

/// Builder for [`LanternConfig`]. Validation happens in [`build`](Self::build).
#[derive(Debug, Clone, Default)]
pub struct LanternConfigBuilder {
    endpoint_url: Option<String>,
    public_key: Option<String>,
    secret_key: Option<String>,
    provider_api_key: Option<String>,
    model_name: Option<String>,
    provider_base_url: Option<String>,
    flush_timeout: Option<Duration>,
    offline: bool,
    bundle_dir: Option<PathBuf>,
}

impl LanternConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a builder from variables. Only malformed values fail here;
    /// missing ones are reported by [`build`](Self::build).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let flush_timeout = match var(ENV_FLUSH_TIMEOUT_MS) {
            Some(raw) => {
                let ms = raw.trim().parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                    var: ENV_FLUSH_TIMEOUT_MS,
                    reason: e.to_string(),
                })?;
                Some(Duration::from_millis(ms))
            }
            None => None,
        };

        Ok(Self {
            endpoint_url: var(ENV_HOST),
            public_key: var(ENV_PUBLIC_KEY),
            secret_key: var(ENV_SECRET_KEY),
            provider_api_key: var(ENV_API_KEY),
            model_name: var(ENV_MODEL),
            provider_base_url: var(ENV_BASE_URL),
            flush_timeout,
            offline: false,
            bundle_dir: None,
        })
    }

    pub fn endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    pub fn public_key(mut self, key: impl Into<String>) -> Self {
        self.public_key = Some(key.into());
        self
    }

    pub fn secret_key(mut self, key: impl Into<String>) -> Self {
        self.secret_key = Some(key.into());
        self
    }

    pub fn provider_api_key(mut self, key: impl Into<String>) -> Self {
        self.provider_api_key = Some(key.into());
        self
    }

    pub fn model_name(mut self, model: impl Into<String>) -> Self {
        self.model_name = Some(model.into());
        self
    }

    pub fn provider_base_url(mut self, url: impl Into<String>) -> Self {
        self.provider_base_url = Some(url.into());
        self
    }

    pub fn flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = Some(timeout);
        self
    }

    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn bundle_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bundle_dir = Some(dir.into());
        self
    }

    /// Fails with every missing credential at once, unless offline.
    pub fn build(self) -> Result<LanternConfig, ConfigError> {
        if !self.offline {
            let missing: Vec<&'static str> = [
                (ENV_PUBLIC_KEY, &self.public_key),
                (ENV_SECRET_KEY, &self.secret_key),
                (ENV_API_KEY, &self.provider_api_key),
            ]
            .into_iter()
            .filter(|(_, value)| value.as_deref().map_or(true, |v| v.trim().is_empty()))
            .map(|(name, _)| name)
            .collect();
            if !missing.is_empty() {
                return Err(ConfigError::MissingVariables(missing));
            }
        }

        let flush_timeout = self.flush_timeout.unwrap_or(DEFAULT_FLUSH_TIMEOUT);
        if flush_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                var: ENV_FLUSH_TIMEOUT_MS,
                reason: "must be greater than zero".to_string(),
            });
        }

        let model_name = self.model_name.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        if model_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                var: ENV_MODEL,
                reason: "must not be blank".to_string(),
            });
        }

        Ok(LanternConfig {
            endpoint_url: self.endpoint_url.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            public_key: self.public_key.unwrap_or_default(),
            secret_key: self.secret_key.unwrap_or_default(),
            provider_api_key: self.provider_api_key.unwrap_or_default(),
            model_name,
            provider_base_url: self.provider_base_url,
            flush_timeout,
            offline: self.offline,
            bundle_dir: self.bundle_dir,
        })
    }
}
