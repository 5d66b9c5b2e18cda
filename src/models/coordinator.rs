use crate::chat::{ChatSession, InferenceEngine};
use crate::config::schema::{Config, InferenceConfig};
use crate::error::{ChatError, DownloadError, Result};
use crate::models::download::{DownloadHandle, DownloadManager, DownloadProgress};
use crate::models::registry::ModelRegistry;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Where the current model selection stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionState {
    Idle,
    Checking { name: String },
    Ready { name: String, path: PathBuf },
    AwaitingDownload { name: String, url: String },
    Downloading { name: String, url: String },
    Registering { name: String, path: PathBuf },
    Unresolvable { name: String },
    Failed { name: String, reason: String, cancelled: bool },
}

impl SelectionState {
    /// A download is running or its result is being registered
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        matches!(self, Self::Downloading { .. } | Self::Registering { .. })
    }
}

/// Bridges model selection to the registry and the download manager.
///
/// The coordinator is the only writer of the registry after startup and the
/// only caller of the download manager.
pub struct ModelCoordinator {
    registry: Arc<RwLock<ModelRegistry>>,
    downloads: DownloadManager,
    state: Arc<Mutex<SelectionState>>,
}

impl ModelCoordinator {
    #[must_use]
    pub fn new(registry: ModelRegistry, downloads: DownloadManager) -> Self {
        Self {
            registry: Arc::new(RwLock::new(registry)),
            downloads,
            state: Arc::new(Mutex::new(SelectionState::Idle)),
        }
    }

    /// Scan the configured directories and set up the download manager
    pub fn from_config(config: &Config) -> Result<Self> {
        let download_dir = config.models.download_dir()?;
        let registry = ModelRegistry::initialize(&config.models, &download_dir);
        let downloads = DownloadManager::new(download_dir, &config.download)?;
        Ok(Self::new(registry, downloads))
    }

    /// Shared read access for UI queries
    #[must_use]
    pub fn registry(&self) -> Arc<RwLock<ModelRegistry>> {
        Arc::clone(&self.registry)
    }

    #[must_use]
    pub const fn downloads(&self) -> &DownloadManager {
        &self.downloads
    }

    pub async fn state(&self) -> SelectionState {
        self.state.lock().await.clone()
    }

    /// Catalog names for the model picker
    pub async fn models(&self) -> BTreeSet<String> {
        self.registry.read().await.models()
    }

    /// React to the user picking `name`.
    ///
    /// Rejected while a download is in flight; the download keeps running.
    pub async fn select(&self, name: &str) -> Result<SelectionState> {
        let mut state = self.state.lock().await;
        if state.is_locked() {
            tracing::warn!("Ignoring selection of {name}: a download is in progress");
            return Err(ChatError::Selection(
                "Please don't switch the model while downloading. Cancel the download first."
                    .to_string(),
            ));
        }
        if name.is_empty() {
            return Err(ChatError::Selection("No model selected".to_string()));
        }

        *state = SelectionState::Checking {
            name: name.to_string(),
        };

        let registry = self.registry.read().await;
        let next = if let Some(path) = registry.local_path(name) {
            SelectionState::Ready {
                name: name.to_string(),
                path: path.to_path_buf(),
            }
        } else if let Some(url) = registry.remote_url(name) {
            SelectionState::AwaitingDownload {
                name: name.to_string(),
                url: url.to_string(),
            }
        } else {
            SelectionState::Unresolvable {
                name: name.to_string(),
            }
        };
        let suggestion = registry.suggest(name);
        drop(registry);

        tracing::info!("Selected {name}: {next:?}");
        *state = next.clone();

        if matches!(next, SelectionState::Unresolvable { .. }) {
            return Err(ChatError::NotFound {
                name: name.to_string(),
                suggestion,
            });
        }
        Ok(next)
    }

    /// Download the pending model, then register it.
    ///
    /// Resolves once with the registered path or the download failure. The
    /// transfer and its registration run in a background task, so dropping
    /// this future does not leave the selection stuck in `Downloading`.
    pub async fn confirm_download<F>(&self, on_progress: F) -> Result<PathBuf>
    where
        F: Fn(DownloadProgress) + Send + Sync + 'static,
    {
        let mut state = self.state.lock().await;
        let SelectionState::AwaitingDownload { name, url } = state.clone() else {
            return Err(ChatError::Selection(format!(
                "No download pending (state: {:?})",
                *state
            )));
        };

        let handle = match self.downloads.start_download(&url, on_progress) {
            Ok(handle) => handle,
            Err(e) => {
                *state = failed(&name, &e);
                return Err(e.into());
            }
        };
        *state = SelectionState::Downloading {
            name: name.clone(),
            url,
        };
        drop(state);

        let task = tokio::spawn(complete_download(
            handle,
            name.clone(),
            Arc::clone(&self.state),
            Arc::clone(&self.registry),
        ));

        match task.await {
            Ok(result) => result,
            Err(e) => {
                let error = DownloadError::Interrupted(e.to_string());
                let mut state = self.state.lock().await;
                if state.is_locked() {
                    *state = failed(&name, &error);
                }
                Err(error.into())
            }
        }
    }

    /// Cancel the running download. Returns false when nothing was downloading.
    pub async fn cancel_download(&self) -> bool {
        let state = self.state.lock().await;
        if matches!(*state, SelectionState::Downloading { .. }) {
            self.downloads.cancel();
            true
        } else {
            false
        }
    }

    /// Name and path of the model ready for inference
    pub async fn ready_model(&self) -> Option<(String, PathBuf)> {
        match &*self.state.lock().await {
            SelectionState::Ready { name, path } => Some((name.clone(), path.clone())),
            _ => None,
        }
    }

    /// Hand the ready model to the inference engine.
    ///
    /// Engine failures leave the selection `Ready` so the user can retry.
    pub async fn open_chat(
        &self,
        engine: Arc<dyn InferenceEngine>,
        config: &InferenceConfig,
    ) -> Result<ChatSession> {
        let (name, path) = self
            .ready_model()
            .await
            .ok_or_else(|| ChatError::Selection("No model is ready".to_string()))?;

        tracing::info!("Loading model {name}");
        ChatSession::open(engine, &name, &path, config).await
    }
}

/// Wait for the transfer, then register the file and settle the selection
async fn complete_download(
    handle: DownloadHandle,
    name: String,
    state: Arc<Mutex<SelectionState>>,
    registry: Arc<RwLock<ModelRegistry>>,
) -> Result<PathBuf> {
    let result = handle.wait().await;

    let mut state = state.lock().await;
    match result {
        Ok(path) => {
            *state = SelectionState::Registering {
                name: name.clone(),
                path: path.clone(),
            };

            let mut registry = registry.write().await;
            registry.register(path.clone());
            if !registry.exists(&name) {
                tracing::warn!(
                    "Downloaded file {} does not resolve to model name {name}",
                    path.display()
                );
            }
            drop(registry);

            tracing::info!("Model {name} is ready");
            *state = SelectionState::Ready {
                name,
                path: path.clone(),
            };
            Ok(path)
        }
        Err(e) => {
            *state = failed(&name, &e);
            Err(e.into())
        }
    }
}

fn failed(name: &str, error: &DownloadError) -> SelectionState {
    SelectionState::Failed {
        name: name.to_string(),
        reason: error.to_string(),
        cancelled: matches!(error, DownloadError::Cancelled),
    }
}
