//! Configuration module for llama-chat
//!
//! Loads config from `$XDG_CONFIG_HOME/llama-chat/config.toml` or the platform config dir.
//! Falls back to embedded defaults if the file doesn't exist.
//! Partial configs are merged with defaults using serde's default attributes.
//!
//! # Example
//!
//! ```no_run
//! use llama_chat::config::Config;
//!
//! let config = Config::load().expect("Failed to load config");
//! println!("Model extension: {}", config.models.extension);
//! println!("Context size: {}", config.inference.ctx_size);
//! ```

pub mod schema;

pub use schema::{Config, DownloadConfig, InferenceConfig, MatchPolicy, ModelsConfig};
