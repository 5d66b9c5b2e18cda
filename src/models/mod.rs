pub mod coordinator;
pub mod download;
pub mod registry;

pub use coordinator::{ModelCoordinator, SelectionState};
pub use download::{DownloadHandle, DownloadManager, DownloadProgress, DownloadSession, DownloadState};
pub use registry::{ModelEntry, ModelOrigin, ModelRegistry};
