use std::path::PathBuf;
use thiserror::Error;

/// Main error type for llama-chat
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Config error: {0}\n\nTroubleshooting:\n- Check config file: ~/.config/llama-chat/config.toml\n- Remove the file to fall back to defaults\n- Run with RUST_LOG=debug for more details")]
    Config(String),

    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    #[error("Model '{name}' is neither installed nor downloadable{}", suggestion_hint(.suggestion))]
    NotFound {
        name: String,
        suggestion: Option<String>,
    },

    #[error("Inference error: {0}")]
    Instance(#[from] InstanceError),

    #[error("Model selection error: {0}")]
    Selection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Non-fatal errors collected while scanning model directories
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Failed to create download directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read model directory {}: {source}", .path.display())]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Download-specific errors
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Another download is already in progress\n\nTroubleshooting:\n- Wait for the current download to finish\n- Or cancel it before starting a new one")]
    Busy,

    #[error("Invalid download URL: {0}")]
    InvalidUrl(String),

    #[error("Network error: {0}\n\nTroubleshooting:\n- Check internet connection\n- Verify the model URL is still reachable\n- Try the download again")]
    NetworkFailure(String),

    #[error("Server responded with HTTP {0}")]
    BadStatus(u16),

    #[error("Failed to write download data: {0}\n\nTroubleshooting:\n- Ensure sufficient disk space in the download directory\n- Check write permissions")]
    Storage(std::io::Error),

    #[error("Failed to move downloaded file into place: {0}")]
    MoveFailure(std::io::Error),

    #[error("Download cancelled")]
    Cancelled,

    #[error("Download stopped unexpectedly: {0}")]
    Interrupted(String),
}

/// Failure reported by the inference engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{stage} failed: {message}")]
pub struct InstanceError {
    pub stage: String,
    pub message: String,
}

impl InstanceError {
    pub fn new(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

fn suggestion_hint(suggestion: &Option<String>) -> String {
    suggestion
        .as_ref()
        .map(|s| format!(" (did you mean '{s}'?)"))
        .unwrap_or_default()
}

pub type Result<T> = std::result::Result<T, ChatError>;
