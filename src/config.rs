//! Application configuration.
//!
//! Loaded from `config/default.toml`, an optional environment file, and
//! `ESSPILOT__`-prefixed environment variables (`__` nests sections).
//! Invalid configuration is fatal at startup.

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[validate(schema(function = "validate_app_config"))]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,

    #[validate(nested)]
    pub updater: UpdaterConfig,

    /// Key for the credential cipher collaborator. Exactly 32 bytes.
    #[validate(length(min = 32, max = 32))]
    pub encryption_key: String,

    #[serde(default)]
    pub admin_emails: Vec<String>,

    #[serde(default = "default_release")]
    pub release: String,

    #[serde(default)]
    pub show_hidden: bool,

    #[serde(default = "default_storage_backend")]
    pub storage_backend: String,
}

/// Settings for the (external) web surface; the core only logs them.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub listen_addr: String,

    #[serde(default)]
    pub dev_proxy: Option<String>,

    #[serde(default = "default_web_cache_secs")]
    pub web_cache_secs: u64,
}

/// Update-loop configuration. The cadence is minutes, not seconds.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct UpdaterConfig {
    #[validate(range(min = 1, max = 1440))]
    pub tick_minutes: u64,

    #[validate(range(min = 1, max = 64))]
    pub concurrency: usize,

    /// Run exactly one site instead of the whole fleet.
    #[serde(default)]
    pub single_site: Option<String>,
}

fn default_release() -> String {
    "dev".to_string()
}
fn default_storage_backend() -> String {
    "memory".to_string()
}
fn default_web_cache_secs() -> u64 {
    300
}

fn validate_app_config(config: &AppConfig) -> Result<(), validator::ValidationError> {
    if config.storage_backend != "memory" {
        return Err(validator::ValidationError::new("unknown storage backend"));
    }
    Ok(())
}

impl AppConfig {
    /// Load configuration in order (later overrides earlier):
    /// 1. config/default.toml
    /// 2. config/<environment>.toml when given
    /// 3. ESSPILOT__ environment variables
    pub fn load() -> Result<Self> {
        Self::load_with_env(None)
    }

    pub fn load_with_env(environment: Option<&str>) -> Result<Self> {
        let mut figment = Figment::new().merge(Toml::file("config/default.toml"));
        if let Some(env) = environment {
            figment = figment.merge(Toml::file(format!("config/{env}.toml")));
        }
        figment = figment.merge(Env::prefixed("ESSPILOT__").split("__"));

        let config: AppConfig = figment.extract().context("Failed to parse configuration")?;
        config
            .validate()
            .context("Configuration validation failed")?;
        Ok(config)
    }
}
