//! Configuration management for lmdesk

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::GenerationSettings;

/// Environment override for `gateway.base_url`
pub const GATEWAY_URL_ENV: &str = "LMDESK_GATEWAY_URL";
/// Environment variable seeding the catalog credential
pub const CATALOG_TOKEN_ENV: &str = "HF_TOKEN";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub catalog: CatalogConfig,
    pub thread: ThreadConfig,
    /// Settings used until the gateway reports the stored ones
    pub generation: GenerationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    /// Bound on establishing a connection; requests themselves are unbounded
    pub connect_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9015/api".to_string(),
            connect_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub page_size: usize,
    /// How long a finished install keeps its success/error badge
    pub install_notice_ms: u64,
    /// Model chosen with `lmdesk select`, preferred over the first installed one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_model: Option<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            install_notice_ms: 3000,
            preferred_model: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadConfig {
    /// Text shown in the assistant slot while a reply is outstanding
    pub placeholder: String,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            placeholder: "...".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            Config::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        config.normalize();
        Ok(config)
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "lmdesk") {
            let config_dir = proj_dirs.config_dir();
            std::fs::create_dir_all(config_dir)?;
            Ok(config_dir.join("config.toml"))
        } else {
            Ok(PathBuf::from("config.toml"))
        }
    }

    /// Save configuration to default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Credential for gated catalogs taken from the environment
    pub fn catalog_token_from_env() -> Option<String> {
        std::env::var(CATALOG_TOKEN_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(GATEWAY_URL_ENV) {
            if !url.trim().is_empty() {
                self.gateway.base_url = url;
            }
        }
    }

    fn normalize(&mut self) {
        self.catalog.page_size = self.catalog.page_size.max(1);
        self.generation = self.generation.clamped();
    }
}
