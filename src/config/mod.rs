//! Configuration for the Careerfolio core.
//!
//! Settings are resolved from the environment. `dotenvy` is consulted first
//! for `./.env`, then `~/.careerfolio/.env`, so the effective priority is:
//!
//!   explicit env vars > `./.env` > `~/.careerfolio/.env`

pub(crate) mod helpers;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::error::ConfigError;

/// Default quiet window for coalescing identity-change events.
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

/// Default attachment size cap, matching the backend's object-size policy.
pub const DEFAULT_MAX_ATTACHMENT_BYTES: u64 = 5 * 1024 * 1024;

/// Path to the Careerfolio-specific `.env` file: `~/.careerfolio/.env`.
pub fn careerfolio_env_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".careerfolio")
        .join(".env")
}

/// Load env vars from `./.env` and `~/.careerfolio/.env`.
///
/// dotenvy never overwrites existing vars, so explicit env vars always win
/// and the local `.env` shadows the home-dir one.
pub fn load_env() {
    let _ = dotenvy::dotenv();
    let home = careerfolio_env_path();
    if home.exists() {
        let _ = dotenvy::from_path(&home);
    }
}

/// Main configuration for the core.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: BackendConfig,
    pub reconciler: ReconcilerConfig,
    pub attachments: AttachmentConfig,
}

impl Config {
    /// Resolve the full configuration from the environment.
    pub fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            backend: BackendConfig::resolve()?,
            reconciler: ReconcilerConfig::resolve()?,
            attachments: AttachmentConfig::resolve()?,
        })
    }
}

/// Remote backend endpoints and credentials.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL of the backend (auth, rows, and objects hang off this).
    pub base_url: Url,
    /// Publishable API key sent with every request.
    pub anon_key: SecretString,
    /// Object-store bucket holding profile attachments.
    pub bucket: String,
}

impl BackendConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let raw_url = helpers::require_env("CAREERFOLIO_BACKEND_URL")?;
        let base_url = Url::parse(&raw_url).map_err(|e| ConfigError::InvalidValue {
            key: "CAREERFOLIO_BACKEND_URL".to_string(),
            message: e.to_string(),
        })?;
        let anon_key = SecretString::from(helpers::require_env("CAREERFOLIO_ANON_KEY")?);
        let bucket = helpers::optional_env("CAREERFOLIO_BUCKET")
            .unwrap_or_else(|| "profiles".to_string());
        Ok(Self {
            base_url,
            anon_key,
            bucket,
        })
    }
}

/// Session reconciliation tunables.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Quiet window for coalescing bursts of identity-change events.
    /// Zero disables coalescing (used by tests).
    pub debounce_window: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
        }
    }
}

impl ReconcilerConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let debounce_ms = helpers::optional_env_parse::<u64>("CAREERFOLIO_DEBOUNCE_MS")?
            .unwrap_or(DEFAULT_DEBOUNCE_MS);
        Ok(Self {
            debounce_window: Duration::from_millis(debounce_ms),
        })
    }
}

/// Attachment validation tunables.
#[derive(Debug, Clone)]
pub struct AttachmentConfig {
    /// Maximum accepted file size in bytes.
    pub max_size_bytes: u64,
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
        }
    }
}

impl AttachmentConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let max_size_bytes = helpers::optional_env_parse::<u64>("CAREERFOLIO_MAX_ATTACHMENT_BYTES")?
            .unwrap_or(DEFAULT_MAX_ATTACHMENT_BYTES);
        Ok(Self { max_size_bytes })
    }
}
