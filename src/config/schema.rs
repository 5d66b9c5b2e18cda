use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
}

/// How a requested model name is matched against local paths
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    /// Derived file name must equal the requested name
    #[default]
    Exact,
    /// Any local path containing the requested name matches
    Containment,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct ModelsConfig {
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Read-only directory of models shipped with the app
    pub bundled_dir: Option<PathBuf>,
    /// Writable directory downloads are moved into
    pub download_dir: Option<PathBuf>,
    #[serde(default)]
    pub match_policy: MatchPolicy,
    /// Extra name -> URL entries layered over the built-in catalog
    #[serde(default)]
    pub remote: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct DownloadConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Fixed destination file name; derived from the URL when unset
    pub filename: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct InferenceConfig {
    #[serde(default = "default_inference_type")]
    pub inference_type: String,
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_ctx_size")]
    pub ctx_size: u32,
    #[serde(default = "default_greeting")]
    pub greeting: String,
}

// Default value functions
fn default_extension() -> String {
    "gguf".to_string()
}
fn default_timeout_secs() -> u64 {
    3600
}
fn default_inference_type() -> String {
    "llama.cpp".to_string()
}
fn default_profile() -> String {
    "general".to_string()
}
fn default_ctx_size() -> u32 {
    2048
}
fn default_greeting() -> String {
    "Hi, how can I help you?".to_string()
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            extension: default_extension(),
            bundled_dir: None,
            download_dir: None,
            match_policy: MatchPolicy::default(),
            remote: BTreeMap::new(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            filename: None,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            inference_type: default_inference_type(),
            profile: default_profile(),
            ctx_size: default_ctx_size(),
            greeting: default_greeting(),
        }
    }
}

impl Config {
    /// Load config from the default location, falling back to defaults if absent
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Load config from an explicit path, falling back to defaults if absent
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            ChatError::Config(format!("Failed to parse {}: {e}", path.display()))
        })
    }
}

impl ModelsConfig {
    /// Resolve the download directory, defaulting to `<data_dir>/alpaca-ai`
    pub fn download_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.download_dir {
            return Ok(dir.clone());
        }

        dirs::data_dir()
            .map(|d| d.join("alpaca-ai"))
            .ok_or_else(|| ChatError::Config("Cannot determine data directory".to_string()))
    }
}

/// Get config file path from `XDG_CONFIG_HOME` or the platform config dir
pub fn config_path() -> Result<PathBuf> {
    let config_dir = if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config)
    } else {
        dirs::config_dir()
            .ok_or_else(|| ChatError::Config("Cannot determine config directory".to_string()))?
    };

    Ok(config_dir.join("llama-chat").join("config.toml"))
}
