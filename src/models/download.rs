use crate::config::schema::DownloadConfig;
use crate::error::DownloadError;
use chrono::{DateTime, Utc};
use futures_util::{FutureExt, StreamExt};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a download session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Idle,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Bytes transferred so far. `bytes_expected` is `None` when the server sent no length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub bytes_written: u64,
    pub bytes_expected: Option<u64>,
}

impl DownloadProgress {
    /// Rounded percentage, or `None` when progress is indeterminate
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn percent(&self) -> Option<u32> {
        match self.bytes_expected {
            Some(total) if total > 0 => {
                Some((self.bytes_written as f64 / total as f64 * 100.0).round() as u32)
            }
            _ => None,
        }
    }
}

/// Snapshot of the current (or most recent) transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSession {
    pub source_url: String,
    pub bytes_written: u64,
    pub bytes_expected: Option<u64>,
    pub state: DownloadState,
    pub destination_path: Option<PathBuf>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for DownloadSession {
    fn default() -> Self {
        Self {
            source_url: String::new(),
            bytes_written: 0,
            bytes_expected: None,
            state: DownloadState::Idle,
            destination_path: None,
            started_at: None,
            finished_at: None,
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    session: DownloadSession,
    cancel: Option<CancellationToken>,
}

type SharedState = Arc<Mutex<Shared>>;

fn lock(shared: &SharedState) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs at most one HTTP(S) model download at a time
#[derive(Debug)]
pub struct DownloadManager {
    client: reqwest::Client,
    destination_dir: PathBuf,
    fixed_filename: Option<String>,
    shared: SharedState,
}

impl DownloadManager {
    /// Create new downloader writing into `destination_dir`
    pub fn new(destination_dir: impl Into<PathBuf>, config: &DownloadConfig) -> Result<Self, DownloadError> {
        let destination_dir = destination_dir.into();
        std::fs::create_dir_all(&destination_dir).map_err(DownloadError::Storage)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DownloadError::NetworkFailure(format!("Failed to create HTTP client: {e}")))?;

        tracing::info!("Model download folder is {}", destination_dir.display());

        Ok(Self {
            client,
            destination_dir,
            fixed_filename: config.filename.clone(),
            shared: SharedState::default(),
        })
    }

    #[must_use]
    pub fn destination_dir(&self) -> &Path {
        &self.destination_dir
    }

    /// Current session state
    #[must_use]
    pub fn session(&self) -> DownloadSession {
        lock(&self.shared).session.clone()
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        lock(&self.shared).session.state == DownloadState::InProgress
    }

    /// Start downloading `url` in the background.
    ///
    /// Returns as soon as the transfer task is spawned; must be called from
    /// within a tokio runtime. Fails with [`DownloadError::Busy`] while another
    /// transfer is in progress.
    pub fn start_download<F>(&self, url: &str, on_progress: F) -> Result<DownloadHandle, DownloadError>
    where
        F: Fn(DownloadProgress) + Send + Sync + 'static,
    {
        let mut shared = lock(&self.shared);
        if shared.session.state == DownloadState::InProgress {
            tracing::warn!("Rejected download of {url}: another download is in progress");
            return Err(DownloadError::Busy);
        }

        let filename = resolve_filename(url, self.fixed_filename.as_deref())?;
        let cancel = CancellationToken::new();

        shared.session = DownloadSession {
            source_url: url.to_string(),
            state: DownloadState::InProgress,
            started_at: Some(Utc::now()),
            ..DownloadSession::default()
        };
        shared.cancel = Some(cancel.clone());
        drop(shared);

        tracing::info!("Downloading {url} as {filename}");

        let transfer = Transfer {
            client: self.client.clone(),
            url: url.to_string(),
            destination: self.destination_dir.join(&filename),
            temp_path: self.destination_dir.join(format!(".{filename}.part")),
            shared: Arc::clone(&self.shared),
            cancel: cancel.clone(),
        };

        let task = tokio::spawn(async move {
            // A panicking progress callback must not leave the session busy
            let result = match AssertUnwindSafe(transfer.run(&on_progress)).catch_unwind().await {
                Ok(result) => result,
                Err(_) => {
                    transfer.remove_temp().await;
                    Err(DownloadError::Interrupted("transfer task panicked".to_string()))
                }
            };
            finish(&transfer.shared, &result);
            result
        });

        Ok(DownloadHandle {
            task,
            cancel,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Request cancellation of the active transfer; no-op when idle
    pub fn cancel(&self) {
        let shared = lock(&self.shared);
        if shared.session.state != DownloadState::InProgress {
            return;
        }
        if let Some(cancel) = &shared.cancel {
            tracing::info!("Cancelling download of {}", shared.session.source_url);
            cancel.cancel();
        }
    }
}

/// Awaitable result of a single download. Resolves exactly once.
#[derive(Debug)]
pub struct DownloadHandle {
    task: JoinHandle<Result<PathBuf, DownloadError>>,
    cancel: CancellationToken,
    shared: SharedState,
}

impl DownloadHandle {
    /// Request cancellation of this transfer
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the final file path or the failure reason
    pub async fn wait(self) -> Result<PathBuf, DownloadError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                let result = Err(if e.is_cancelled() {
                    DownloadError::Cancelled
                } else {
                    DownloadError::Interrupted(e.to_string())
                });
                finish(&self.shared, &result);
                result
            }
        }
    }
}

struct Transfer {
    client: reqwest::Client,
    url: String,
    destination: PathBuf,
    temp_path: PathBuf,
    shared: SharedState,
    cancel: CancellationToken,
}

impl Transfer {
    async fn run(&self, on_progress: &(dyn Fn(DownloadProgress) + Send + Sync)) -> Result<PathBuf, DownloadError> {
        let streamed = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(DownloadError::Cancelled),
            result = self.stream_to_temp(on_progress) => result,
        };

        if let Err(e) = streamed {
            self.remove_temp().await;
            return Err(e);
        }

        if let Err(e) = self.move_into_place().await {
            self.remove_temp().await;
            return Err(e);
        }

        Ok(self.destination.clone())
    }

    async fn stream_to_temp(&self, on_progress: &(dyn Fn(DownloadProgress) + Send + Sync)) -> Result<(), DownloadError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| DownloadError::NetworkFailure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::BadStatus(status.as_u16()));
        }

        let bytes_expected = response.content_length();
        lock(&self.shared).session.bytes_expected = bytes_expected;

        let mut file = tokio::fs::File::create(&self.temp_path)
            .await
            .map_err(DownloadError::Storage)?;

        let mut bytes_written: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| DownloadError::NetworkFailure(e.to_string()))?;
            file.write_all(&chunk).await.map_err(DownloadError::Storage)?;

            bytes_written += chunk.len() as u64;
            lock(&self.shared).session.bytes_written = bytes_written;

            let progress = DownloadProgress {
                bytes_written,
                bytes_expected,
            };
            tracing::debug!("Progress {bytes_written}/{bytes_expected:?}");
            on_progress(progress);
        }

        file.flush().await.map_err(DownloadError::Storage)?;
        file.sync_all().await.map_err(DownloadError::Storage)?;

        tracing::info!(
            "Transferred {} from {}",
            format_bytes(bytes_written),
            self.url
        );
        Ok(())
    }

    /// Replace any existing destination with the finished temp file
    async fn move_into_place(&self) -> Result<(), DownloadError> {
        if tokio::fs::try_exists(&self.destination)
            .await
            .map_err(DownloadError::MoveFailure)?
        {
            tokio::fs::remove_file(&self.destination)
                .await
                .map_err(DownloadError::MoveFailure)?;
        }

        tokio::fs::rename(&self.temp_path, &self.destination)
            .await
            .map_err(DownloadError::MoveFailure)?;

        tracing::info!("File moved to {}", self.destination.display());
        Ok(())
    }

    async fn remove_temp(&self) {
        match tokio::fs::remove_file(&self.temp_path).await {
            Ok(()) => tracing::debug!("Removed partial file {}", self.temp_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "Failed to remove partial file {}: {e}",
                self.temp_path.display()
            ),
        }
    }
}

/// Record the terminal state of the session
fn finish(shared: &SharedState, result: &Result<PathBuf, DownloadError>) {
    let mut shared = lock(shared);
    if shared.session.state.is_terminal() {
        return;
    }

    shared.session.state = match result {
        Ok(path) => {
            tracing::info!("Download finished: {}", path.display());
            shared.session.destination_path = Some(path.clone());
            DownloadState::Completed
        }
        Err(DownloadError::Cancelled) => {
            tracing::info!("Download cancelled: {}", shared.session.source_url);
            DownloadState::Cancelled
        }
        Err(e) => {
            tracing::error!("Download failed: {e}");
            DownloadState::Failed
        }
    };
    shared.session.finished_at = Some(Utc::now());
    shared.cancel = None;
}

/// Destination file name: the fixed name if configured, else the URL's last path segment
pub fn resolve_filename(url: &str, fixed: Option<&str>) -> Result<String, DownloadError> {
    let parsed =
        reqwest::Url::parse(url).map_err(|e| DownloadError::InvalidUrl(format!("{url}: {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(DownloadError::InvalidUrl(format!(
            "{url}: unsupported scheme '{}'",
            parsed.scheme()
        )));
    }

    if let Some(name) = fixed {
        return Ok(name.to_string());
    }

    parsed
        .path_segments()
        .and_then(Iterator::last)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .ok_or_else(|| DownloadError::InvalidUrl(format!("{url}: no file name in path")))
}

/// Format bytes as human-readable string
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
