use crate::error::ConfigError;
use crate::prompt::WorkingLanguage;
use crate::router::ModelCatalog;
use crate::session::HistoryPolicy;
use anyhow::{Context, Result};
use keyring::Entry;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_API_KEY_REF: &str = "env:GEMINI_API_KEY";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

const KEYRING_SERVICE: &str = "medequip_assistant_api_key";
const KEYRING_USER: &str = "generative-language";

/// Runtime settings, read once at startup.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api_url: String,
    // 'keyring' or 'env:MY_API_KEY'
    pub api_key_ref: String,
    pub models: ModelCatalog,
    pub request_timeout: Duration,
    pub language: WorkingLanguage,
    pub history_policy: HistoryPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key_ref: DEFAULT_API_KEY_REF.to_string(),
            models: ModelCatalog::default(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            language: WorkingLanguage::default(),
            history_policy: HistoryPolicy::default(),
        }
    }
}

impl AppConfig {
    /// Builds the configuration from `MEDEQUIP_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`AppConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup("MEDEQUIP_API_URL") {
            config.api_url = url.trim_end_matches('/').to_string();
        }
        if let Some(key_ref) = lookup("MEDEQUIP_API_KEY_REF") {
            config.api_key_ref = key_ref;
        }
        if let Some(model) = lookup("MEDEQUIP_MODEL_LITE") {
            config.models.lite = model;
        }
        if let Some(model) = lookup("MEDEQUIP_MODEL_STANDARD") {
            config.models.standard = model;
        }
        if let Some(model) = lookup("MEDEQUIP_MODEL_ADVANCED") {
            config.models.advanced = model;
        }
        if let Some(secs) = lookup("MEDEQUIP_TIMEOUT_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| ConfigError::InvalidValue {
                name: "MEDEQUIP_TIMEOUT_SECS",
                value: secs.clone(),
            })?;
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(lang) = lookup("MEDEQUIP_LANGUAGE") {
            config.language = lang.parse().map_err(|_| ConfigError::InvalidValue {
                name: "MEDEQUIP_LANGUAGE",
                value: lang.clone(),
            })?;
        }
        if let Some(policy) = lookup("MEDEQUIP_HISTORY_POLICY") {
            config.history_policy = policy.parse().map_err(|_| ConfigError::InvalidValue {
                name: "MEDEQUIP_HISTORY_POLICY",
                value: policy.clone(),
            })?;
        }

        log::debug!(
            "Loaded configuration: api_url={}, language={:?}, history_policy={:?}, timeout={}s",
            config.api_url,
            config.language,
            config.history_policy,
            config.request_timeout.as_secs()
        );
        Ok(config)
    }
}

// --- API Key Retrieval ---

/// Retrieves the API key.
/// It checks the `api_key_ref` field to determine whether to read from
/// environment variables or the OS keyring.
pub fn get_api_key(config: &AppConfig) -> Result<String> {
    let ref_str = config.api_key_ref.as_str();
    if let Some(env_var_name) = ref_str.strip_prefix("env:") {
        log::debug!("Retrieving API key from environment variable: {}", env_var_name);
        return std::env::var(env_var_name).context(format!(
            "Failed to get API key from environment variable '{}'",
            env_var_name
        ));
    }
    if ref_str == "keyring" {
        let entry = Entry::new(KEYRING_SERVICE, KEYRING_USER).context("Failed to create keyring entry")?;
        log::debug!("Retrieving API key from keyring for service: {}", KEYRING_SERVICE);
        return entry
            .get_password()
            .context("Failed to get API key from keyring. Store it with /set-key first.");
    }
    Err(ConfigError::UnsupportedKeyRef(ref_str.to_string()).into())
}

/// Stores an API key in the OS keyring.
pub fn set_api_key_in_keyring(api_key: &str) -> Result<()> {
    let entry = Entry::new(KEYRING_SERVICE, KEYRING_USER)
        .context("Failed to create keyring entry for setting password")?;
    log::info!("Setting API key in keyring for service: {}", KEYRING_SERVICE);
    entry
        .set_password(api_key)
        .context("Failed to set API key in keyring")
}
