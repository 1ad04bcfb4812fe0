use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use keepmd_core::auth::DEFAULT_AUTH_URL;
use keepmd_core::endpoint::{endpoint_url, EndpointError};
use keepmd_core::storage::default_state_path;
use keepmd_core::sync::DEFAULT_NOTES_API_URL;
use keepmd_core::TokenStorage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Invalid configuration: {0}")]
    Endpoint(#[from] EndpointError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: String,
    pub state_path: PathBuf,
    pub token_storage: TokenStorage,
    pub auth_url: String,
    pub notes_api_url: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "KEEPMD_BIND_ADDR", "127.0.0.1:8787");

        // No home directory means the path has to be given explicitly.
        let state_path = optional_trimmed(&lookup, "KEEPMD_STATE_PATH")
            .map(PathBuf::from)
            .or_else(default_state_path)
            .ok_or(ConfigError::MissingVar("KEEPMD_STATE_PATH"))?;

        let token_storage = value_or_default(&lookup, "KEEPMD_TOKEN_STORAGE", "keyring")
            .parse::<TokenStorage>()
            .map_err(|_| {
                ConfigError::Invalid("KEEPMD_TOKEN_STORAGE must be `keyring` or `file`".to_string())
            })?;

        let auth_url = endpoint_url(
            &value_or_default(&lookup, "KEEPMD_AUTH_URL", DEFAULT_AUTH_URL),
            "KEEPMD_AUTH_URL",
        )?;
        let notes_api_url = endpoint_url(
            &value_or_default(&lookup, "KEEPMD_NOTES_API_URL", DEFAULT_NOTES_API_URL),
            "KEEPMD_NOTES_API_URL",
        )?;

        Ok(Self {
            bind_addr,
            state_path,
            token_storage,
            auth_url,
            notes_api_url,
        })
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
